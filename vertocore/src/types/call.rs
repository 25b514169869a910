use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a call. Rendered lowercase on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CallId(Uuid);

impl CallId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for CallId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for CallId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Uuid's Display is already lowercase hyphenated.
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Lifecycle state of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum CallState {
    /// Created locally, nothing sent yet.
    #[default]
    New,
    /// Outbound invite is being sent.
    Connecting,
    /// Remote side alerting (outbound) or incoming call waiting (inbound).
    Ringing,
    Active,
    Held,
    /// Bye sent or received.
    Hangup,
    /// Cleanup finished; the call is gone from the call table.
    Done,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Hangup | Self::Done)
    }
}

/// Hangup cause codes understood by the signaling server.
///
/// Several Q.850 causes share value 16 on the wire (`MANAGER_REQUEST`,
/// `PROGRESS_TIMEOUT`); only `NORMAL_CLEARING` is modelled for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CauseCode {
    UnallocatedNumber,
    NormalClearing,
    UserBusy,
    CallRejected,
    NormalTemporaryFailure,
    IncompatibleDestination,
    MandatoryIeMissing,
    RecoveryOnTimerExpire,
    OriginatorCancel,
    AllottedTimeout,
    InvalidGateway,
}

impl CauseCode {
    pub const fn code(&self) -> i64 {
        match self {
            Self::UnallocatedNumber => 1,
            Self::NormalClearing => 16,
            Self::UserBusy => 17,
            Self::CallRejected => 21,
            Self::NormalTemporaryFailure => 41,
            Self::IncompatibleDestination => 88,
            Self::MandatoryIeMissing => 96,
            Self::RecoveryOnTimerExpire => 102,
            Self::OriginatorCancel => 487,
            Self::AllottedTimeout => 602,
            Self::InvalidGateway => 608,
        }
    }

    pub const fn cause(&self) -> &'static str {
        match self {
            Self::UnallocatedNumber => "UNALLOCATED_NUMBER",
            Self::NormalClearing => "NORMAL_CLEARING",
            Self::UserBusy => "USER_BUSY",
            Self::CallRejected => "CALL_REJECTED",
            Self::NormalTemporaryFailure => "NORMAL_TEMPORARY_FAILURE",
            Self::IncompatibleDestination => "INCOMPATIBLE_DESTINATION",
            Self::MandatoryIeMissing => "MANDATORY_IE_MISSING",
            Self::RecoveryOnTimerExpire => "RECOVERY_ON_TIMER_EXPIRE",
            Self::OriginatorCancel => "ORIGINATOR_CANCEL",
            Self::AllottedTimeout => "ALLOTTED_TIMEOUT",
            Self::InvalidGateway => "INVALID_GATEWAY",
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::UnallocatedNumber),
            16 => Some(Self::NormalClearing),
            17 => Some(Self::UserBusy),
            21 => Some(Self::CallRejected),
            41 => Some(Self::NormalTemporaryFailure),
            88 => Some(Self::IncompatibleDestination),
            96 => Some(Self::MandatoryIeMissing),
            102 => Some(Self::RecoveryOnTimerExpire),
            487 => Some(Self::OriginatorCancel),
            602 => Some(Self::AllottedTimeout),
            608 => Some(Self::InvalidGateway),
            _ => None,
        }
    }
}

/// Why a call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminationReason {
    pub cause: String,
    pub cause_code: Option<i64>,
    pub sip_code: Option<i64>,
    pub sip_reason: Option<String>,
}

impl TerminationReason {
    pub fn from_cause(code: CauseCode) -> Self {
        Self {
            cause: code.cause().to_string(),
            cause_code: Some(code.code()),
            sip_code: None,
            sip_reason: None,
        }
    }

    pub fn cause_code(&self) -> Option<CauseCode> {
        self.cause_code.and_then(CauseCode::from_code)
    }
}

impl From<CauseCode> for TerminationReason {
    fn from(code: CauseCode) -> Self {
        Self::from_cause(code)
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cause)?;
        if let Some(code) = self.cause_code {
            write!(f, " ({code})")?;
        }
        if let (Some(sip), Some(reason)) = (self.sip_code, &self.sip_reason) {
            write!(f, " [SIP {sip} {reason}]")?;
        }
        Ok(())
    }
}

/// Registration state of the SIP gateway behind the signaling server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum GatewayState {
    Unreged,
    Trying,
    Register,
    Reged,
    Unregister,
    Failed,
    FailWait,
    Expired,
    Noreg,
    Other(String),
}

impl GatewayState {
    pub fn parse(s: &str) -> Self {
        match s {
            "UNREGED" => Self::Unreged,
            "TRYING" => Self::Trying,
            "REGISTER" => Self::Register,
            "REGED" => Self::Reged,
            "UNREGISTER" => Self::Unregister,
            "FAILED" => Self::Failed,
            "FAIL_WAIT" => Self::FailWait,
            "EXPIRED" => Self::Expired,
            "NOREG" => Self::Noreg,
            other => Self::Other(other.to_string()),
        }
    }
}
