//! Post-scenario checks.

use crate::{
    client::ProtocolClient, env::Environment, result::ProtocolResult, transport::Transport,
};

use super::{
    definition::{PayloadPattern, ValidationLevel},
    payload::generate_payload,
};

/// Bytes staged by the recovery and complete-protocol checks
pub const VALIDATION_PAYLOAD_SIZE: usize = 128;

/// Applies `level` to the client's current connection.
pub fn validate<T: Transport, E: Environment>(
    client: &mut ProtocolClient<T, E>,
    level: ValidationLevel,
) -> ProtocolResult {
    tracing::debug!(level = level.as_str(), "validating");
    let result = match level {
        ValidationLevel::Basic => {
            if client.is_connected() {
                ProtocolResult::ok("transport still open")
            } else {
                ProtocolResult::failed("transport closed", "TRANSPORT_ERROR")
            }
        },
        ValidationLevel::RecoveryHandshake => {
            let handshake = client.handshake();
            if handshake.success {
                ProtocolResult::ok("recovery handshake succeeded")
            } else {
                prefixed("recovery handshake", handshake)
            }
        },
        ValidationLevel::RecoveryProtocol => {
            let handshake = client.handshake();
            if handshake.success {
                let prepare = client.prepare(VALIDATION_PAYLOAD_SIZE as u32);
                if prepare.success {
                    ProtocolResult::ok("recovery protocol succeeded")
                } else {
                    prefixed("recovery protocol prepare", prepare)
                }
            } else {
                prefixed("recovery protocol handshake", handshake)
            }
        },
        ValidationLevel::CompleteProtocol => {
            let payload =
                generate_payload(PayloadPattern::Incremental, VALIDATION_PAYLOAD_SIZE, 0);
            let session = client.run_session(&payload);
            if session.success {
                ProtocolResult::ok("complete protocol succeeded")
            } else {
                prefixed("complete protocol", session)
            }
        },
    };
    result.with_data("validation_level", level.as_str())
}

fn prefixed(context: &str, failed: ProtocolResult) -> ProtocolResult {
    ProtocolResult {
        success: false,
        message: format!("{context} failed: {}", failed.message),
        data: failed.data,
        error_code: failed.error_code,
    }
}
