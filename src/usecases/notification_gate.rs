use std::rc::Rc;

use serde_json::Value;

use crate::{
    domain::notification::{NavigationFocus, NotificationEvent},
    usecases::{contracts::FocusProvider, session::SessionManager},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateReason {
    IdentityUnknown,
    /// A conversation event with neither sender nor recipient.
    ParticipantsUnknown,
    OwnAction,
    ChatInFocus,
    Relevant,
    NoRule,
}

impl GateReason {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::IdentityUnknown => "GATE_IDENTITY_UNKNOWN",
            Self::ParticipantsUnknown => "GATE_PARTICIPANTS_UNKNOWN",
            Self::OwnAction => "GATE_OWN_ACTION",
            Self::ChatInFocus => "GATE_CHAT_IN_FOCUS",
            Self::Relevant => "GATE_RELEVANT",
            Self::NoRule => "GATE_NO_RULE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    pub suppress: bool,
    pub reason: GateReason,
}

impl GateDecision {
    fn allow(reason: GateReason) -> Self {
        Self {
            suppress: false,
            reason,
        }
    }

    fn suppress(reason: GateReason) -> Self {
        Self {
            suppress: true,
            reason,
        }
    }
}

/// Decides whether a notification should be surfaced. First matching rule
/// wins; anything undecidable is allowed.
pub fn decide(
    event: &NotificationEvent,
    current_user_id: Option<&str>,
    focus: &NavigationFocus,
) -> GateDecision {
    let Some(current_user_id) = current_user_id else {
        return GateDecision::allow(GateReason::IdentityUnknown);
    };

    let from_current_user = event.sender_id.as_deref() == Some(current_user_id);

    if event.kind.is_conversation() {
        if event.sender_id.is_none() && event.recipient_id.is_none() {
            return GateDecision::allow(GateReason::ParticipantsUnknown);
        }
        if from_current_user {
            return GateDecision::suppress(GateReason::OwnAction);
        }
        if event
            .chat_id
            .as_deref()
            .is_some_and(|chat_id| focus.is_chat_open(chat_id))
        {
            return GateDecision::suppress(GateReason::ChatInFocus);
        }
        return GateDecision::allow(GateReason::Relevant);
    }

    if event.kind.is_social() {
        if from_current_user {
            return GateDecision::suppress(GateReason::OwnAction);
        }
        return GateDecision::allow(GateReason::Relevant);
    }

    GateDecision::allow(GateReason::NoRule)
}

/// Binds [`decide`] to the live identity and navigation focus.
pub struct NotificationGate {
    session: Rc<SessionManager>,
    focus: Rc<dyn FocusProvider>,
}

impl NotificationGate {
    pub fn new(session: Rc<SessionManager>, focus: Rc<dyn FocusProvider>) -> Self {
        Self { session, focus }
    }

    pub fn evaluate(&self, event: &NotificationEvent) -> GateDecision {
        let current_user_id = self.session.current_user_id();
        let decision = decide(event, current_user_id.as_deref(), &self.focus.focus());

        tracing::debug!(
            kind = ?event.kind,
            suppress = decision.suppress,
            reason = decision.reason.as_label(),
            "notification gate decision"
        );
        decision
    }

    /// Normalizes a raw push/local payload and evaluates it.
    pub fn evaluate_payload(&self, payload: Value) -> (NotificationEvent, GateDecision) {
        let event = NotificationEvent::from_payload(payload);
        let decision = self.evaluate(&event);
        (event, decision)
    }
}
