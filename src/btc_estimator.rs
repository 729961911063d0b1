use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::SignerError;
use crate::types::ScriptType;

/// Outputs below this many satoshis are uneconomical to spend; change under
/// the threshold is folded into the fee instead of being emitted.
pub const DUST_THRESHOLD_SATS: i64 = 546;

const P2PKH_INPUT_VBYTES: usize = 148;
const P2WPKH_INPUT_VBYTES: usize = 68;
const P2PKH_OUTPUT_VBYTES: usize = 34;
const P2WPKH_OUTPUT_VBYTES: usize = 31;
const BASE_OVERHEAD_VBYTES: usize = 10;

/// Fee and change figures for one candidate transaction shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeEstimate {
    pub estimated_fee: i64,
    pub change_value: i64,
    pub num_outputs: usize,
    pub tx_size: usize,
}

fn transaction_vsize(
    p2pkh_inputs: usize,
    p2wpkh_inputs: usize,
    p2pkh_outputs: usize,
    p2wpkh_outputs: usize,
) -> usize {
    let input_size = p2pkh_inputs * P2PKH_INPUT_VBYTES + p2wpkh_inputs * P2WPKH_INPUT_VBYTES;
    let output_size = p2pkh_outputs * P2PKH_OUTPUT_VBYTES + p2wpkh_outputs * P2WPKH_OUTPUT_VBYTES;

    let mut overhead = BASE_OVERHEAD_VBYTES;
    // witness marker/flag, amortized
    if p2wpkh_inputs > 0 || p2wpkh_outputs > 0 {
        overhead += 1;
    }

    input_size + output_size + overhead
}

fn count_inputs_by_type(input_types: &[ScriptType]) -> (usize, usize) {
    let p2pkh = input_types
        .iter()
        .filter(|t| **t == ScriptType::P2PKH)
        .count();
    (p2pkh, input_types.len() - p2pkh)
}

fn fee_for_vsize(fee_rate: f64, vsize: usize) -> Result<i64, SignerError> {
    let rate = Decimal::from_f64(fee_rate).ok_or_else(|| SignerError::InvalidField {
        field: "fee_rate",
        reason: format!("not representable: {fee_rate}"),
    })?;
    rate.checked_mul(Decimal::from(vsize as u64))
        .and_then(|fee| {
            fee.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_i64()
        })
        .ok_or_else(|| SignerError::InvalidField {
            field: "fee_rate",
            reason: format!("fee overflows at rate {fee_rate} and size {vsize} vbytes"),
        })
}

/// Two-phase fee estimation. Adding a change output grows the transaction and
/// therefore the fee, which can push the change itself under the dust
/// threshold, so the change case is re-evaluated at the larger size instead of
/// assuming a fixed output count. The change output is always sized as
/// witness-pubkey-hash, whatever the destination type.
pub fn estimate_fee(
    dest_type: ScriptType,
    input_types: &[ScriptType],
    amount: i64,
    total_input_value: i64,
    fee_rate: f64,
) -> Result<FeeEstimate, SignerError> {
    let (p2pkh_inputs, p2wpkh_inputs) = count_inputs_by_type(input_types);

    let (p2pkh_outputs, p2wpkh_outputs) = match dest_type {
        ScriptType::P2PKH => (1, 0),
        ScriptType::P2WPKH => (0, 1),
    };

    // Phase one: destination output only.
    let size_no_change =
        transaction_vsize(p2pkh_inputs, p2wpkh_inputs, p2pkh_outputs, p2wpkh_outputs);
    let fee_no_change = fee_for_vsize(fee_rate, size_no_change)?;

    if total_input_value < amount + fee_no_change {
        return Err(SignerError::InsufficientFunds {
            total: total_input_value,
            amount,
            fee: fee_no_change,
        });
    }

    let change_value = total_input_value - amount - fee_no_change;

    if change_value == 0 {
        return Ok(FeeEstimate {
            estimated_fee: fee_no_change,
            change_value: 0,
            num_outputs: 1,
            tx_size: size_no_change,
        });
    }

    if change_value > 0 && change_value < DUST_THRESHOLD_SATS {
        return Ok(FeeEstimate {
            estimated_fee: fee_no_change + change_value,
            change_value: 0,
            num_outputs: 1,
            tx_size: size_no_change,
        });
    }

    // Phase two: retry with the change output included.
    if change_value >= DUST_THRESHOLD_SATS {
        let size_with_change =
            transaction_vsize(p2pkh_inputs, p2wpkh_inputs, p2pkh_outputs, p2wpkh_outputs + 1);
        let fee_with_change = fee_for_vsize(fee_rate, size_with_change)?;

        if total_input_value >= amount + fee_with_change {
            let recomputed_change = total_input_value - amount - fee_with_change;
            if recomputed_change >= DUST_THRESHOLD_SATS {
                return Ok(FeeEstimate {
                    estimated_fee: fee_with_change,
                    change_value: recomputed_change,
                    num_outputs: 2,
                    tx_size: size_with_change,
                });
            }
        }
    }

    // The larger transaction pushed the change under the threshold; fall back
    // to one output and fold the leftover into the fee.
    let mut estimated_fee = fee_no_change;
    if change_value > 0 {
        estimated_fee += change_value;
    }

    Ok(FeeEstimate {
        estimated_fee,
        change_value: 0,
        num_outputs: 1,
        tx_size: size_no_change,
    })
}
