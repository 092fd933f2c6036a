//! Sequences dialog modules into one terminal outcome.
//!
//! The machine keeps one foreground module and a LIFO stack of suspended
//! ones. [`StateMachine::goto_state`] stops the foreground before the next
//! module starts, so two modules never both receive events.
//!
//! # Transitions
//!
//! ```text
//! Start ──► check_auth ──► pick_email ─────────────────────┐
//!                      └─► authenticate ──► enter_password ─┤
//!                                       ├─► new_user ───────┤
//!                                       └─► provision ──────┼─► generate_assertion ──► done
//!                                             │    ▲        │
//!                                             ▼    │        │
//!                                      verify_primary_user  │
//! Cancel / WindowUnload ──► done (null) ◄───────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::identifiers::SubscriptionId;
use crate::protocol::{Command, DialogEvent, EventKind};

use super::context::{NegotiationContext, NegotiationError};
use super::mediator::Mediator;
use super::module::{Module, ModuleHandle};
use super::modules::{
    Authenticate, CheckAuth, EnterPassword, ForgotPassword, GenerateAssertion, NewUser,
    PickEmail, ProvisionPrimaryUser, VerifyPrimaryUser,
};
use super::services::Screen;

/// Events the machine itself reacts to.
const MACHINE_EVENTS: [EventKind; 16] = [
    EventKind::Start,
    EventKind::Command,
    EventKind::AuthenticationChecked,
    EventKind::Authenticate,
    EventKind::AddressInfo,
    EventKind::Authenticated,
    EventKind::UserCreated,
    EventKind::EmailChosen,
    EventKind::ForgotPassword,
    EventKind::PrimaryUserProvisioned,
    EventKind::PrimaryUserUnauthenticated,
    EventKind::PrimaryUserAuthenticating,
    EventKind::PrimaryUserVerified,
    EventKind::AssertionGenerated,
    EventKind::CollaboratorFailed,
    EventKind::Fatal,
];

// ============================================================================
// State
// ============================================================================

struct Foreground {
    module: Box<dyn Module>,
    handle: ModuleHandle,
}

impl Foreground {
    fn suspend(&mut self) {
        self.handle.release();
        self.module.stop();
    }
}

#[derive(Default)]
struct MachineState {
    current: Option<Foreground>,
    stack: Vec<Box<dyn Module>>,
}

struct MachineInner {
    mediator: Mediator,
    context: NegotiationContext,
    state: Mutex<MachineState>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    finished: AtomicBool,
}

// ============================================================================
// StateMachine
// ============================================================================

/// The dialog state machine for one negotiation. Cheap to clone.
#[derive(Clone)]
pub struct StateMachine {
    inner: Arc<MachineInner>,
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("current", &self.current())
            .field("depth", &self.depth())
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl StateMachine {
    /// Creates a machine driving `context` through `mediator`.
    #[must_use]
    pub fn new(mediator: Mediator, context: NegotiationContext) -> Self {
        Self {
            inner: Arc::new(MachineInner {
                mediator,
                context,
                state: Mutex::new(MachineState::default()),
                subscriptions: Mutex::new(Vec::new()),
                finished: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribes to the mediator and publishes [`DialogEvent::Start`].
    pub fn start(&self) {
        let mut subscriptions = self.inner.subscriptions.lock();
        if !subscriptions.is_empty() {
            return;
        }
        for kind in MACHINE_EVENTS {
            let weak: Weak<MachineInner> = Arc::downgrade(&self.inner);
            let id = self.inner.mediator.subscribe(kind, move |event| {
                if let Some(inner) = weak.upgrade() {
                    Self { inner }.handle_event(event);
                }
            });
            subscriptions.push(id);
        }
        drop(subscriptions);

        debug!(negotiation = %self.inner.context.id(), "State machine started");
        self.inner.mediator.publish(DialogEvent::Start);
    }

    // ========================================================================
    // Stack operations
    // ========================================================================

    /// Makes `module` the foreground.
    ///
    /// The current foreground is stopped first, then pushed on the stack
    /// when `save` is `true` and destroyed otherwise.
    pub fn goto_state(&self, save: bool, mut module: Box<dyn Module>) {
        if self.is_finished() {
            return;
        }
        let mut state = self.inner.state.lock();

        let from = if let Some(mut previous) = state.current.take() {
            previous.suspend();
            let name = previous.module.name();
            if save {
                state.stack.push(previous.module);
            } else {
                previous.module.destroy();
            }
            Some(name)
        } else {
            None
        };

        let handle = self.new_handle(module.name());
        debug!(
            negotiation = %self.inner.context.id(),
            from = from.unwrap_or("-"),
            to = module.name(),
            save,
            depth = state.stack.len(),
            "State transition"
        );
        module.start(&handle);
        state.current = Some(Foreground { module, handle });
    }

    /// Destroys the foreground and resumes the most recently suspended
    /// module.
    ///
    /// Returns `false`, leaving the foreground alone, if nothing is
    /// suspended.
    pub fn pop_state(&self) -> bool {
        if self.is_finished() {
            return false;
        }
        let mut state = self.inner.state.lock();
        let Some(mut module) = state.stack.pop() else {
            debug!(negotiation = %self.inner.context.id(), "Nothing to go back to");
            return false;
        };

        if let Some(mut previous) = state.current.take() {
            previous.suspend();
            previous.module.destroy();
        }

        let handle = self.new_handle(module.name());
        debug!(
            negotiation = %self.inner.context.id(),
            to = module.name(),
            depth = state.stack.len(),
            "State resumed"
        );
        module.resume(&handle);
        state.current = Some(Foreground { module, handle });
        true
    }

    /// Restarts the foreground module in place.
    pub fn retry(&self) {
        if self.is_finished() {
            return;
        }
        let mut state = self.inner.state.lock();
        let Some(current) = state.current.as_mut() else {
            return;
        };
        current.suspend();
        current.handle = self.new_handle(current.module.name());
        debug!(module = current.module.name(), "Retrying");
        current.module.start(&current.handle);
    }

    /// Returns the name of the foreground module.
    #[must_use]
    pub fn current(&self) -> Option<&'static str> {
        self.inner
            .state
            .lock()
            .current
            .as_ref()
            .map(|fg| fg.module.name())
    }

    /// Returns the number of suspended modules.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.state.lock().stack.len()
    }

    /// Returns `true` once the negotiation has an outcome.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::SeqCst)
    }

    /// Returns the negotiation context.
    #[inline]
    #[must_use]
    pub fn context(&self) -> &NegotiationContext {
        &self.inner.context
    }

    /// Stops and destroys every module and unsubscribes the machine.
    pub fn shutdown(&self) {
        if self.inner.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.inner.state.lock();
            if let Some(mut current) = state.current.take() {
                current.suspend();
                current.module.destroy();
            }
            for mut module in state.stack.drain(..) {
                module.destroy();
            }
        }
        for id in self.inner.subscriptions.lock().drain(..) {
            self.inner.mediator.unsubscribe(id);
        }
        debug!(negotiation = %self.inner.context.id(), "State machine shut down");
    }

    fn new_handle(&self, name: &'static str) -> ModuleHandle {
        ModuleHandle::new(name, self.inner.mediator.clone(), self.inner.context.clone())
    }

    /// Shuts down, then delivers the outcome.
    fn finish(&self, deliver: impl FnOnce(&NegotiationContext) -> bool) {
        if self.is_finished() {
            return;
        }
        self.shutdown();
        deliver(&self.inner.context);
    }

    // ========================================================================
    // Event handling
    // ========================================================================

    fn handle_event(&self, event: &DialogEvent) {
        let context = &self.inner.context;
        if self.is_finished() || context.is_complete() {
            return;
        }

        match event {
            DialogEvent::Start => self.on_start(),
            DialogEvent::Command(command) => self.on_command(command),

            DialogEvent::AuthenticationChecked { emails } => {
                self.on_authentication_checked(emails.clone());
            }
            DialogEvent::Authenticate { email } => {
                self.goto_state(true, Box::new(Authenticate::new(email.clone())));
            }
            DialogEvent::AddressInfo { email, info } => {
                if info.is_primary() {
                    self.goto_state(true, Box::new(ProvisionPrimaryUser::new(email, info.clone())));
                } else if info.known {
                    self.goto_state(true, Box::new(EnterPassword::new(email)));
                } else {
                    self.goto_state(true, Box::new(NewUser::new(email)));
                }
            }
            DialogEvent::Authenticated { email }
            | DialogEvent::UserCreated { email }
            | DialogEvent::EmailChosen { email } => {
                self.goto_state(true, Box::new(GenerateAssertion::new(email, None)));
            }
            DialogEvent::ForgotPassword { email } => {
                self.goto_state(true, Box::new(ForgotPassword::new(email)));
            }

            DialogEvent::PrimaryUserProvisioned { email, key } => {
                self.goto_state(false, Box::new(GenerateAssertion::new(email, Some(key.clone()))));
            }
            DialogEvent::PrimaryUserUnauthenticated { email, info } => {
                if context.verified_with_provider() {
                    let error = NegotiationError::primary_verification_failed(email);
                    self.finish(|context| context.fail(error));
                } else {
                    self.goto_state(false, Box::new(VerifyPrimaryUser::new(email, info.clone())));
                }
            }
            DialogEvent::PrimaryUserAuthenticating { email } => {
                debug!(negotiation = %context.id(), email = %email, "Waiting for provider sign-in");
            }
            DialogEvent::PrimaryUserVerified { email, info } => {
                context.mark_verified_with_provider();
                self.goto_state(true, Box::new(ProvisionPrimaryUser::new(email, info.clone())));
            }

            DialogEvent::AssertionGenerated { email, assertion } => match assertion {
                Some(assertion) => {
                    let assertion = assertion.clone();
                    self.finish(|context| context.complete_with(email, assertion));
                }
                None => {
                    info!(negotiation = %context.id(), email = %email, "Issuer declined address");
                    self.goto_state(false, Box::new(CheckAuth));
                }
            },

            DialogEvent::CollaboratorFailed { action, message } => {
                warn!(negotiation = %context.id(), action = *action, message = %message, "Collaborator failed");
                context.render(&Screen::Error {
                    code: (*action).to_string(),
                    message: message.clone(),
                    retryable: true,
                });
            }
            DialogEvent::Fatal(error) => {
                let error = error.clone();
                self.finish(|context| context.fail(error));
            }

            DialogEvent::AuthenticationFailed { .. } | DialogEvent::PasswordResetRequested { .. } => {}
        }
    }

    fn on_start(&self) {
        let context = &self.inner.context;
        if let Some(email) = context.take_pending_verification() {
            info!(negotiation = %context.id(), email = %email, "Back from provider sign-in");
            self.goto_state(false, Box::new(Authenticate::fixed(email)));
        } else {
            self.goto_state(false, Box::new(CheckAuth));
        }
    }

    fn on_authentication_checked(&self, emails: Vec<String>) {
        let context = &self.inner.context;
        context.set_emails(emails.clone());

        if let Some(required) = context.options().required_email.clone() {
            if emails.contains(&required) {
                self.goto_state(false, Box::new(PickEmail::new(vec![required])));
            } else {
                self.goto_state(false, Box::new(Authenticate::fixed(required)));
            }
        } else if emails.is_empty() {
            self.goto_state(false, Box::new(Authenticate::new(None)));
        } else {
            self.goto_state(false, Box::new(PickEmail::new(emails)));
        }
    }

    fn on_command(&self, command: &Command) {
        let context = &self.inner.context;
        match command {
            Command::Cancel => self.finish(NegotiationContext::cancel),
            Command::Back => {
                self.pop_state();
            }
            Command::Retry => self.retry(),
            Command::SetRememberMe { remember } => context.set_remember_me(*remember),
            Command::WindowUnload => {
                if context.succeeded() || context.is_leaving() {
                    debug!(negotiation = %context.id(), "Unload while finished or away");
                } else {
                    self.finish(NegotiationContext::cancel);
                }
            }
            _ => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
