//! Result envelopes and operator input/output shapes
//!
//! Every operator output is an [`Envelope`]: a `(data, code)` pair where
//! code `0` means success and any nonzero value is an operator-specific
//! failure category. The scheduler never inspects `data`; it only routes
//! envelopes between nodes.
//!
//! Operator input is an explicit sum, [`Input`]: either a single upstream
//! envelope or the ordered fan-in list of every predecessor's envelope.
//! Output mirrors it as [`Output`] because some operators (the unpack
//! adapter over a fan-in list) legitimately produce one envelope per input.
//!
//! # Wire codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0    | success |
//! | 101  | bad input / transport error / oversize |
//! | 102  | target system error / read failure |
//! | 103  | bad payload / write failure |
//! | 104  | timeout |
//! | 106  | response parse error |

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Success
pub const CODE_OK: i64 = 0;
/// Bad input, transport error, or oversize response
pub const CODE_BAD_INPUT: i64 = 101;
/// Target system error or read failure
pub const CODE_TARGET_ERROR: i64 = 102;
/// Bad payload or write failure
pub const CODE_BAD_PAYLOAD: i64 = 103;
/// Timeout
pub const CODE_TIMEOUT: i64 = 104;
/// Response parse error
pub const CODE_PARSE_ERROR: i64 = 106;

/// The `(data, code)` pair produced by any operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Operator output value
    pub data: Value,
    /// `0` on success, operator-specific failure category otherwise
    pub code: i64,
}

impl Envelope {
    /// Successful envelope wrapping `data`
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            code: CODE_OK,
        }
    }

    /// Failed envelope with the given code
    pub fn failed(data: Value, code: i64) -> Self {
        Self { data, code }
    }

    /// Whether the code is the success code
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

/// Operator input: one upstream envelope or an ordered fan-in list
#[derive(Debug, Clone)]
pub enum Input {
    /// Output of the single predecessor (or the pipeline's initial data)
    Single(Envelope),
    /// Outputs of every predecessor, in predecessor order
    Fanin(Vec<Envelope>),
}

/// Operator output: one envelope, or one envelope per fan-in entry
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// A single result envelope
    Single(Envelope),
    /// One envelope per processed fan-in entry, in input order
    Fanin(Vec<Envelope>),
}

impl Output {
    /// Collapse to a single envelope.
    ///
    /// A fan-in output becomes one envelope whose data is the array of the
    /// entries' data values; its code is the first nonzero entry code, so a
    /// partially failed fan-out is visible to callers that only see the
    /// collapsed shape (multi-predecessor inputs and the terminal value).
    pub fn collapse(self) -> Envelope {
        match self {
            Output::Single(env) => env,
            Output::Fanin(envs) => {
                let code = envs
                    .iter()
                    .map(|e| e.code)
                    .find(|c| *c != CODE_OK)
                    .unwrap_or(CODE_OK);
                let data = Value::Array(envs.into_iter().map(|e| e.data).collect());
                Envelope { data, code }
            }
        }
    }
}

impl From<Output> for Input {
    fn from(out: Output) -> Self {
        match out {
            Output::Single(env) => Input::Single(env),
            Output::Fanin(envs) => Input::Fanin(envs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_ok() {
        let env = Envelope::ok(json!({"a": 1}));
        assert!(env.is_ok());
        assert_eq!(env.code, CODE_OK);
    }

    #[test]
    fn test_envelope_failed() {
        let env = Envelope::failed(Value::Null, CODE_TIMEOUT);
        assert!(!env.is_ok());
        assert_eq!(env.code, 104);
    }

    #[test]
    fn test_collapse_single() {
        let out = Output::Single(Envelope::ok(json!("x")));
        assert_eq!(out.collapse(), Envelope::ok(json!("x")));
    }

    #[test]
    fn test_collapse_fanin_success() {
        let out = Output::Fanin(vec![Envelope::ok(json!(1)), Envelope::ok(json!(2))]);
        let env = out.collapse();
        assert_eq!(env.code, CODE_OK);
        assert_eq!(env.data, json!([1, 2]));
    }

    #[test]
    fn test_collapse_fanin_propagates_first_failure() {
        let out = Output::Fanin(vec![
            Envelope::ok(json!(1)),
            Envelope::failed(Value::Null, CODE_TARGET_ERROR),
            Envelope::failed(Value::Null, CODE_TIMEOUT),
        ]);
        assert_eq!(out.collapse().code, CODE_TARGET_ERROR);
    }

    #[test]
    fn test_output_into_input_preserves_shape() {
        let single: Input = Output::Single(Envelope::ok(json!(1))).into();
        assert!(matches!(single, Input::Single(_)));

        let fanin: Input = Output::Fanin(vec![Envelope::ok(json!(1))]).into();
        assert!(matches!(fanin, Input::Fanin(_)));
    }
}
