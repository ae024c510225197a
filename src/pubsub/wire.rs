//! JSON-RPC 2.0 subscription wire shapes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::{Commitment, Version, WatchError, WatchResult};
use crate::resources::{RawAccount, RawLogNotification};

#[derive(Serialize)]
struct Request<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Serialize)]
struct AccountSubscribeConfig {
    encoding: &'static str,
    commitment: &'static str,
}

#[derive(Serialize)]
struct LogsMentions<'a> {
    mentions: [&'a str; 1],
}

#[derive(Serialize)]
struct CommitmentConfig {
    commitment: &'static str,
}

fn encode<P: Serialize>(id: u64, method: &str, params: P) -> WatchResult<String> {
    sonic_rs::to_string(&Request {
        jsonrpc: "2.0",
        id,
        method,
        params,
    })
    .map_err(|e| WatchError::ParseFailed(e.to_string()))
}

pub fn account_subscribe_request(
    id: u64,
    address: &str,
    commitment: Commitment,
) -> WatchResult<String> {
    encode(
        id,
        "accountSubscribe",
        (
            address,
            AccountSubscribeConfig {
                encoding: "base64",
                commitment: commitment.as_str(),
            },
        ),
    )
}

pub fn logs_subscribe_request(
    id: u64,
    mentions: &str,
    commitment: Commitment,
) -> WatchResult<String> {
    encode(
        id,
        "logsSubscribe",
        (
            LogsMentions {
                mentions: [mentions],
            },
            CommitmentConfig {
                commitment: commitment.as_str(),
            },
        ),
    )
}

/// Notification payload that maps onto a resource's raw push shape.
pub trait WireNotification: DeserializeOwned + Send + 'static {
    type Raw: Send + 'static;

    fn into_raw(self, slot: Version) -> WatchResult<Self::Raw>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiAccount {
    lamports: u64,
    owner: String,
    /// `[payload, encoding]`
    data: (String, String),
    executable: bool,
    rent_epoch: u64,
}

impl WireNotification for UiAccount {
    type Raw = RawAccount;

    fn into_raw(self, _slot: Version) -> WatchResult<RawAccount> {
        let (payload, encoding) = self.data;
        if encoding != "base64" {
            return Err(WatchError::ParseFailed(format!(
                "unsupported account data encoding: {encoding}"
            )));
        }
        let data = BASE64
            .decode(payload.as_bytes())
            .map_err(|e| WatchError::ParseFailed(format!("account data: {e}")))?;
        Ok(RawAccount {
            lamports: self.lamports,
            owner: self.owner,
            data: Bytes::from(data),
            executable: self.executable,
            rent_epoch: self.rent_epoch,
        })
    }
}

#[derive(Deserialize)]
pub struct UiLogs {
    signature: String,
    #[serde(default)]
    err: Option<sonic_rs::Value>,
    #[serde(default)]
    logs: Vec<String>,
}

impl WireNotification for UiLogs {
    type Raw = RawLogNotification;

    fn into_raw(self, slot: Version) -> WatchResult<RawLogNotification> {
        let err = match self.err {
            Some(value) => Some(
                sonic_rs::to_string(&value).map_err(|e| WatchError::ParseFailed(e.to_string()))?,
            ),
            None => None,
        };
        Ok(RawLogNotification {
            slot,
            signature: self.signature,
            err,
            logs: self.logs,
        })
    }
}

#[derive(Deserialize)]
struct RpcErrorObject {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct SlotContext {
    slot: Version,
}

#[derive(Deserialize)]
struct Contextual<N> {
    context: SlotContext,
    value: Option<N>,
}

#[derive(Deserialize)]
struct NotificationParams<N> {
    result: Contextual<N>,
    subscription: u64,
}

/// Missing members deserialize as `None`.
#[derive(Deserialize)]
struct Envelope<N> {
    id: Option<u64>,
    result: Option<u64>,
    error: Option<RpcErrorObject>,
    params: Option<NotificationParams<N>>,
}

/// One decoded inbound text frame.
#[derive(Debug)]
pub enum Inbound<R> {
    Subscribed {
        id: u64,
        subscription: u64,
    },
    Rejected {
        id: Option<u64>,
        code: Option<i64>,
        message: String,
    },
    Notification {
        subscription: u64,
        slot: Version,
        value: Option<R>,
    },
    Other,
}

pub fn parse_inbound<N: WireNotification>(data: &[u8]) -> WatchResult<Inbound<N::Raw>> {
    let envelope: Envelope<N> =
        sonic_rs::from_slice(data).map_err(|e| WatchError::ParseFailed(e.to_string()))?;

    if let Some(error) = envelope.error {
        return Ok(Inbound::Rejected {
            id: envelope.id,
            code: error.code,
            message: error.message,
        });
    }
    if let (Some(id), Some(subscription)) = (envelope.id, envelope.result) {
        return Ok(Inbound::Subscribed { id, subscription });
    }
    if let Some(params) = envelope.params {
        let slot = params.result.context.slot;
        let value = params
            .result
            .value
            .map(|value| value.into_raw(slot))
            .transpose()?;
        return Ok(Inbound::Notification {
            subscription: params.subscription,
            slot,
            value,
        });
    }
    Ok(Inbound::Other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_subscribe_request_shape() {
        let req = account_subscribe_request(7, "Addr111", Commitment::Finalized).unwrap();
        let value: sonic_rs::Value = sonic_rs::from_str(&req).unwrap();
        let expected: sonic_rs::Value = sonic_rs::from_str(
            r#"{"jsonrpc":"2.0","id":7,"method":"accountSubscribe","params":["Addr111",{"encoding":"base64","commitment":"finalized"}]}"#,
        )
        .unwrap();
        assert_eq!(value, expected);
    }

    #[test]
    fn logs_subscribe_request_shape() {
        let req = logs_subscribe_request(3, "Prog111", Commitment::Confirmed).unwrap();
        let value: sonic_rs::Value = sonic_rs::from_str(&req).unwrap();
        let expected: sonic_rs::Value = sonic_rs::from_str(
            r#"{"jsonrpc":"2.0","id":3,"method":"logsSubscribe","params":[{"mentions":["Prog111"]},{"commitment":"confirmed"}]}"#,
        )
        .unwrap();
        assert_eq!(value, expected);
    }

    #[test]
    fn parses_subscribe_confirmation_and_rejection() {
        let ok = parse_inbound::<UiAccount>(br#"{"jsonrpc":"2.0","result":23784,"id":1}"#).unwrap();
        assert!(matches!(
            ok,
            Inbound::Subscribed {
                id: 1,
                subscription: 23784
            }
        ));

        let err = parse_inbound::<UiAccount>(
            br#"{"jsonrpc":"2.0","error":{"code":-32602,"message":"Invalid param"},"id":1}"#,
        )
        .unwrap();
        match err {
            Inbound::Rejected { id, code, message } => {
                assert_eq!(id, Some(1));
                assert_eq!(code, Some(-32602));
                assert_eq!(message, "Invalid param");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_account_notification_with_base64_data() {
        let frame = br#"{"jsonrpc":"2.0","method":"accountNotification","params":{"result":{"context":{"slot":5199307},"value":{"data":["AQID","base64"],"executable":false,"lamports":33594,"owner":"11111111111111111111111111111111","rentEpoch":635,"space":3}},"subscription":23784}}"#;
        match parse_inbound::<UiAccount>(frame).unwrap() {
            Inbound::Notification {
                subscription,
                slot,
                value: Some(account),
            } => {
                assert_eq!(subscription, 23784);
                assert_eq!(slot, 5199307);
                assert_eq!(account.lamports, 33594);
                assert_eq!(account.rent_epoch, 635);
                assert_eq!(account.data.as_ref(), &[1u8, 2, 3]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_logs_notification_and_keeps_err_as_json_text() {
        let frame = br#"{"jsonrpc":"2.0","method":"logsNotification","params":{"result":{"context":{"slot":5208469},"value":{"signature":"5h6x","err":{"InstructionError":[0,"InvalidArgument"]},"logs":["Program log: boom"]}},"subscription":24040}}"#;
        match parse_inbound::<UiLogs>(frame).unwrap() {
            Inbound::Notification {
                slot,
                value: Some(log),
                ..
            } => {
                assert_eq!(slot, 5208469);
                assert_eq!(log.signature, "5h6x");
                assert_eq!(log.logs, vec!["Program log: boom".to_string()]);
                let err: sonic_rs::Value = sonic_rs::from_str(log.err.as_deref().unwrap()).unwrap();
                let expected: sonic_rs::Value =
                    sonic_rs::from_str(r#"{"InstructionError":[0,"InvalidArgument"]}"#).unwrap();
                assert_eq!(err, expected);
            }
            other => panic!("unexpected {other:?}"),
        }

        let ok = br#"{"jsonrpc":"2.0","method":"logsNotification","params":{"result":{"context":{"slot":9},"value":{"signature":"s","err":null,"logs":[]}},"subscription":1}}"#;
        match parse_inbound::<UiLogs>(ok).unwrap() {
            Inbound::Notification {
                value: Some(log), ..
            } => assert_eq!(log.err, None),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_account_data_is_a_parse_error() {
        let frame = br#"{"jsonrpc":"2.0","method":"accountNotification","params":{"result":{"context":{"slot":1},"value":{"data":["!!!","base64"],"executable":false,"lamports":1,"owner":"o","rentEpoch":0}},"subscription":1}}"#;
        assert!(matches!(
            parse_inbound::<UiAccount>(frame),
            Err(WatchError::ParseFailed(_))
        ));
        assert!(matches!(
            parse_inbound::<UiAccount>(b"not json"),
            Err(WatchError::ParseFailed(_))
        ));
    }
}
