use std::cell::RefCell;

use crate::{domain::notification::NavigationFocus, usecases::contracts::FocusProvider};

/// Navigation focus as last reported by the screen layer.
#[derive(Debug, Default)]
pub struct FocusState {
    current: RefCell<NavigationFocus>,
}

impl FocusState {
    pub fn set(&self, focus: NavigationFocus) {
        tracing::debug!(screen = %focus.screen, chat_id = ?focus.chat_id, "navigation focus changed");
        *self.current.borrow_mut() = focus;
    }

    pub fn open_chat(&self, chat_id: &str) {
        self.set(NavigationFocus::chat(chat_id));
    }

    pub fn leave_chat(&self) {
        self.set(NavigationFocus::default());
    }
}

impl FocusProvider for FocusState {
    fn focus(&self) -> NavigationFocus {
        self.current.borrow().clone()
    }
}
