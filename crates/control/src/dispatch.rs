use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, info, warn};

use onoffpc_host::{MacAddress, WakeSender};
use onoffpc_link::RemoteLink;

use crate::action::{ActionKind, AllowList, UserId};
use crate::messages;
use crate::registry::TaskRegistry;
use crate::surface::Responder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Rejected,
    WakeSent,
    WakeFailed,
    /// A link command task was started; `superseded` is set when it replaced
    /// a still-running task of the same kind.
    Started { superseded: bool },
}

/// Routes user actions after checking the allow-list.
pub struct Dispatcher {
    link: Arc<RemoteLink>,
    waker: Arc<dyn WakeSender>,
    mac: MacAddress,
    access: AllowList,
    tasks: TaskRegistry<ActionKind>,
}

impl Dispatcher {
    pub fn new(
        link: Arc<RemoteLink>,
        waker: Arc<dyn WakeSender>,
        mac: MacAddress,
        access: AllowList,
    ) -> Self {
        Self {
            link,
            waker,
            mac,
            access,
            tasks: TaskRegistry::new(),
        }
    }

    pub fn is_authorized(&self, user: UserId) -> bool {
        self.access.contains(user)
    }

    pub fn tasks(&self) -> &TaskRegistry<ActionKind> {
        &self.tasks
    }

    pub async fn dispatch(
        &self,
        user: UserId,
        action: ActionKind,
        responder: Arc<dyn Responder>,
    ) -> DispatchOutcome {
        if !self.is_authorized(user) {
            info!(user, %action, "rejected action from user not on the allow-list");
            respond_best_effort(responder.as_ref(), messages::REJECTED).await;
            return DispatchOutcome::Rejected;
        }

        info!(user, %action, "action requested");
        match action.wire_command() {
            None => self.wake(responder.as_ref()).await,
            Some(command) => {
                let task = run_link_command(Arc::clone(&self.link), action, command, responder);
                let superseded = self.tasks.replace(action, task).await;
                if superseded {
                    info!(%action, "cancelled previous request of the same kind");
                }
                DispatchOutcome::Started { superseded }
            }
        }
    }

    async fn wake(&self, responder: &dyn Responder) -> DispatchOutcome {
        match self.waker.wake(&self.mac) {
            Ok(()) => {
                respond_best_effort(responder, messages::WAKE_SENT).await;
                DispatchOutcome::WakeSent
            }
            Err(err) => {
                warn!(mac = %self.mac, %err, "wake-on-lan failed");
                respond_best_effort(responder, messages::WAKE_FAILED).await;
                DispatchOutcome::WakeFailed
            }
        }
    }
}

/// Task body for shutdown/sleep.  Failures and panics turn into the generic
/// failure message; an abort simply drops this future and reports nothing.
async fn run_link_command(
    link: Arc<RemoteLink>,
    action: ActionKind,
    command: &'static str,
    responder: Arc<dyn Responder>,
) {
    let attempt = AssertUnwindSafe(async {
        let reply = link.send(command).await;
        responder.respond(&format!("{action}: {reply}")).await
    })
    .catch_unwind()
    .await;

    match attempt {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            warn!(%action, %err, "action task failed");
            respond_best_effort(responder.as_ref(), messages::ACTION_FAILED).await;
        }
        Err(_) => {
            error!(%action, "action task panicked");
            respond_best_effort(responder.as_ref(), messages::ACTION_FAILED).await;
        }
    }
}

async fn respond_best_effort(responder: &dyn Responder, text: &str) {
    if let Err(err) = responder.respond(text).await {
        warn!(%err, "could not deliver response to user");
    }
}
