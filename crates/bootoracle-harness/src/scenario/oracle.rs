//! Oracle functions for scenario verification.
//!
//! Oracle functions run at the end of scenarios to verify global consistency.
//! They receive the final [`World`] snapshot and check what the host saw
//! against what the device actually did.

use crate::scenario::World;

/// Oracle function type.
///
/// Receives immutable reference to world state and returns:
/// - `Ok(())` if all invariants hold
/// - `Err(message)` if verification fails
pub type OracleFn = Box<dyn FnOnce(&World) -> Result<(), String>>;

/// Every step passed.
pub fn all_succeeded() -> OracleFn {
    Box::new(|world| match world.outcomes().iter().find(|outcome| !outcome.success()) {
        None => Ok(()),
        Some(failed) => Err(format!("{} did not pass: {failed:?}", failed.label())),
    })
}

/// The last step failed with `code`.
pub fn last_failed_with(code: &'static str) -> OracleFn {
    Box::new(move |world| {
        let last = world.last().ok_or("scenario ran no steps")?;
        let result =
            last.result().ok_or_else(|| format!("{} has no protocol result", last.label()))?;
        match (result.success, result.error_code.as_deref()) {
            (false, Some(found)) if found == code => Ok(()),
            (success, found) => Err(format!(
                "{}: expected failure {code}, got success={success} code={found:?}",
                last.label()
            )),
        }
    })
}

/// Device flash is byte-identical to its state before the scenario.
pub fn flash_restored() -> OracleFn {
    Box::new(|world| {
        if world.flash_unchanged() {
            Ok(())
        } else {
            Err("device flash differs from its pre-scenario contents".to_string())
        }
    })
}

/// The device never saw a frame with a bad CRC.
pub fn no_crc_errors() -> OracleFn {
    Box::new(|world| match world.device_stats().crc_errors {
        0 => Ok(()),
        n => Err(format!("device rejected {n} frames with bad CRC")),
    })
}

/// Virtual time stayed under `limit`.
pub fn finished_within(limit: std::time::Duration) -> OracleFn {
    Box::new(move |world| {
        if world.elapsed() <= limit {
            Ok(())
        } else {
            Err(format!("scenario took {:?}, limit {limit:?}", world.elapsed()))
        }
    })
}

/// Combine multiple oracles into one.
pub fn all_of(oracles: Vec<OracleFn>) -> OracleFn {
    Box::new(move |world| {
        for oracle in oracles {
            oracle(world)?;
        }
        Ok(())
    })
}
