use crate::commander::{Commander, CommanderError};
use crate::compositor::{Compositor, CompositorError};
use crate::display::{order_tabs, parse_selected_id, render_lines};
use crate::listener::FocusTrigger;
use crate::notify::Notifier;
use crate::picker::{Picker, PickerError};
use crate::windows::{ResolveError, WindowResolver};
use serde_json::json;
use std::sync::Arc;
use tabctl_core::{distinct_windows, tree::ContainerId, Tab, TabId, WindowId};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How a focus run ended. Cancelled or unresolvable runs are outcomes, not
/// errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusOutcome {
    Focused {
        tab_id: TabId,
        container_id: ContainerId,
    },
    NoTabs,
    NoSelection,
    UnknownTab(TabId),
    Unresolved(WindowId),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Commander(#[from] CommanderError),
    #[error("controller sent an unreadable tab list: {0}")]
    Tabs(#[from] serde_json::Error),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Compositor(#[from] CompositorError),
    #[error(transparent)]
    Picker(#[from] PickerError),
}

pub struct FocusOrchestrator {
    commander: Arc<Commander>,
    resolver: WindowResolver,
    compositor: Arc<dyn Compositor>,
    picker: Arc<dyn Picker>,
    notifier: Arc<dyn Notifier>,
    notify_focused: bool,
}

impl FocusOrchestrator {
    pub fn new(
        commander: Arc<Commander>,
        resolver: WindowResolver,
        compositor: Arc<dyn Compositor>,
        picker: Arc<dyn Picker>,
        notifier: Arc<dyn Notifier>,
        notify_focused: bool,
    ) -> Self {
        Self {
            commander,
            resolver,
            compositor,
            picker,
            notifier,
            notify_focused,
        }
    }

    pub async fn focus_tab(&self) -> Result<FocusOutcome, OrchestratorError> {
        let reply = self.commander.request("get_tabs", json!({})).await?;
        let tabs: Vec<Tab> = serde_json::from_value(reply.message.results)?;
        if tabs.is_empty() {
            return Ok(FocusOutcome::NoTabs);
        }

        let records = self
            .resolver
            .ensure_resolved(&distinct_windows(&tabs))
            .await?;
        let index = self.compositor.get_tree().await?.workspace_index();
        let lines = render_lines(&order_tabs(&tabs, &records, &index));
        debug!(event = "picker_lines", tabs = tabs.len(), windows = records.len());

        let Some(picked) = self.picker.pick(&lines).await? else {
            return Ok(FocusOutcome::NoSelection);
        };
        let Some(tab_id) = parse_selected_id(&picked) else {
            debug!(event = "picker_answer_unparsed", answer = %picked);
            return Ok(FocusOutcome::NoSelection);
        };
        let Some(tab) = tabs.iter().find(|tab| tab.id == tab_id) else {
            return Ok(FocusOutcome::UnknownTab(tab_id));
        };

        let Some(container_id) = self.focus_target(tab.window_id).await? else {
            return Ok(FocusOutcome::Unresolved(tab.window_id));
        };
        self.compositor.focus(container_id).await?;

        let focused = self
            .commander
            .request("focus_tab", json!({ "tab": tab }))
            .await?;
        if self.notify_focused {
            self.commander
                .send_command(
                    "notify_window_focused",
                    json!({"id": focused.id, "windowId": tab.window_id}),
                    None,
                )
                .await?;
        }

        Ok(FocusOutcome::Focused {
            tab_id,
            container_id,
        })
    }

    /// The window may have been closed and reopened while the picker was up.
    async fn focus_target(&self, window: WindowId) -> Result<Option<ContainerId>, ResolveError> {
        if let Some(container) = self.resolver.resolve_focus_target(window).await? {
            return Ok(Some(container));
        }
        self.resolver.ensure_resolved(&[window]).await?;
        self.resolver.resolve_focus_target(window).await
    }

    async fn run_logged(&self, trigger: FocusTrigger) {
        match self.focus_tab().await {
            Ok(FocusOutcome::Focused {
                tab_id,
                container_id,
            }) => info!(
                event = "tab_focused",
                connection = trigger.connection,
                tab_id,
                container_id
            ),
            Ok(outcome) => info!(
                event = "focus_aborted",
                connection = trigger.connection,
                outcome = ?outcome
            ),
            Err(err) => {
                warn!(event = "focus_failed", connection = trigger.connection, error = %err);
                self.notifier
                    .notify("tabctl: focus failed", &err.to_string())
                    .await;
            }
        }
    }
}

/// Runs one focus sequence per trigger until the trigger channel closes.
pub async fn serve_triggers(
    orchestrator: Arc<FocusOrchestrator>,
    mut triggers: mpsc::Receiver<FocusTrigger>,
) {
    while let Some(trigger) = triggers.recv().await {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator.run_logged(trigger).await;
        });
    }
}
