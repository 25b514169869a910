//! Protocol verbs.
//!
//! Verto methods travel as plain strings in the `method` field. Most of the
//! call-control verbs carry the `telnyx_rtc.` prefix; the session verbs
//! (`login`, `echo`) do not.

use std::fmt;
use std::str::FromStr;

/// A control-protocol verb.
///
/// Unrecognized method names are kept as [`Method::Unknown`] so that
/// well-formed but unexpected traffic still reaches the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// Authenticate with a SIP user/password or a login token.
    Login,
    AnonymousLogin,
    /// Diagnostic echo. Requires an authenticated session.
    Echo,
    /// Liveness probe. Either side may send it.
    Ping,
    /// Call offer, outbound or inbound.
    Invite,
    /// Call answered.
    Answer,
    /// Remote side is alerting.
    Ringing,
    RingingAck,
    /// Early media (ringback) description.
    Media,
    /// Call hangup.
    Bye,
    /// Hold / unhold.
    Modify,
    /// In-call info (DTMF and similar).
    Info,
    /// Sent by the server once the session is usable.
    ClientReady,
    /// SIP gateway registration state changes.
    GatewayState,
    Attach,
    /// Server-side display update for a call.
    Display,
    Event,
    Punt,
    Broadcast,
    Unsubscribe,
    AttachCalls,
    DisablePushNotification,
    AiConversation,
    Unknown(String),
}

impl Method {
    /// All recognized verbs.
    pub const KNOWN: [Method; 23] = [
        Self::Login,
        Self::AnonymousLogin,
        Self::Echo,
        Self::Ping,
        Self::Invite,
        Self::Answer,
        Self::Ringing,
        Self::RingingAck,
        Self::Media,
        Self::Bye,
        Self::Modify,
        Self::Info,
        Self::ClientReady,
        Self::GatewayState,
        Self::Attach,
        Self::Display,
        Self::Event,
        Self::Punt,
        Self::Broadcast,
        Self::Unsubscribe,
        Self::AttachCalls,
        Self::DisablePushNotification,
        Self::AiConversation,
    ];

    /// The method name as it appears on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Login => "login",
            Self::AnonymousLogin => "anonymous_login",
            Self::Echo => "echo",
            Self::Ping => "telnyx_rtc.ping",
            Self::Invite => "telnyx_rtc.invite",
            Self::Answer => "telnyx_rtc.answer",
            Self::Ringing => "telnyx_rtc.ringing",
            Self::RingingAck => "telnyx_rtc.ringing_ack",
            Self::Media => "telnyx_rtc.media",
            Self::Bye => "telnyx_rtc.bye",
            Self::Modify => "telnyx_rtc.modify",
            Self::Info => "telnyx_rtc.info",
            Self::ClientReady => "telnyx_rtc.clientReady",
            Self::GatewayState => "telnyx_rtc.gatewayState",
            Self::Attach => "telnyx_rtc.attach",
            Self::Display => "telnyx_rtc.display",
            Self::Event => "telnyx_rtc.event",
            Self::Punt => "telnyx_rtc.punt",
            Self::Broadcast => "telnyx_rtc.broadcast",
            Self::Unsubscribe => "telnyx_rtc.unsubscribe",
            Self::AttachCalls => "telnyx_rtc.attachCalls",
            Self::DisablePushNotification => "telnyx_rtc.disable_push_notification",
            Self::AiConversation => "ai_conversation",
            Self::Unknown(name) => name,
        }
    }

    /// Parse a wire name. Never fails; unrecognized names map to `Unknown`.
    pub fn from_wire(name: &str) -> Self {
        Self::KNOWN
            .iter()
            .find(|m| m.as_str() == name)
            .cloned()
            .unwrap_or_else(|| Self::Unknown(name.to_string()))
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }

    /// Verbs that act on a single call and carry a `callID`.
    pub fn is_call_scoped(&self) -> bool {
        matches!(
            self,
            Self::Invite
                | Self::Answer
                | Self::Ringing
                | Self::Media
                | Self::Bye
                | Self::Modify
                | Self::Info
                | Self::Attach
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_wire(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_methods_roundtrip_through_wire_names() {
        for method in Method::KNOWN.iter() {
            assert_eq!(&Method::from_wire(method.as_str()), method);
            assert!(method.is_known());
        }
    }

    #[test]
    fn test_unknown_method_keeps_raw_name() {
        let method = Method::from_wire("telnyx_rtc.teleport");
        assert_eq!(method, Method::Unknown("telnyx_rtc.teleport".to_string()));
        assert_eq!(method.as_str(), "telnyx_rtc.teleport");
        assert!(!method.is_known());
    }

    #[test]
    fn test_wire_names_are_case_sensitive() {
        assert!(!Method::from_wire("LOGIN").is_known());
        assert_eq!(Method::from_wire("telnyx_rtc.clientReady"), Method::ClientReady);
    }

    #[test]
    fn test_informational_verbs_are_known() {
        assert_eq!(Method::from_wire("telnyx_rtc.punt"), Method::Punt);
        assert_eq!(Method::from_wire("telnyx_rtc.attachCalls"), Method::AttachCalls);
        assert_eq!(
            Method::from_wire("telnyx_rtc.disable_push_notification"),
            Method::DisablePushNotification
        );
        assert_eq!(Method::from_wire("ai_conversation"), Method::AiConversation);
        assert!(!Method::Punt.is_call_scoped());
    }
}
