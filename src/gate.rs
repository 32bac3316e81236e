//! Change-gate: decides whether an incoming reading differs materially from
//! the last stored reading for its device.

use crate::models::{NewReading, Reading};

/// Value at 2-decimal resolution, the precision at which readings compare.
fn centi(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

/// Whether `candidate` must be stored given the latest stored reading.
///
/// A reading is a change when there is no prior reading, when temperature
/// differs at 2-decimal rounding, or when it carries humidity that differs
/// from (or is absent in) the prior reading. Missing humidity on the
/// candidate never counts as a change on its own.
pub fn is_material_change(prior: Option<&Reading>, candidate: &NewReading) -> bool {
    // ---
    let Some(prior) = prior else {
        return true;
    };

    if centi(prior.temperature) != centi(candidate.temperature) {
        return true;
    }

    match (candidate.humidity, prior.humidity) {
        (Some(new), Some(old)) => centi(new) != centi(old),
        (Some(_), None) => true,
        (None, _) => false,
    }
}
