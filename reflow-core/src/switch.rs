//! Changing the flow mode of a session without losing the reader's place.

use tracing::{debug, info, instrument, warn};

use crate::error::SessionResult;
use crate::events::SessionEvent;
use crate::flow::FlowKind;
use crate::session::ReadingSession;

pub struct ModeSwitchCoordinator<'a> {
    session: &'a ReadingSession,
}

impl<'a> ModeSwitchCoordinator<'a> {
    pub fn new(session: &'a ReadingSession) -> Self {
        Self { session }
    }

    /// Accepts the persisted or user-typed name of a mode. Unknown names are
    /// rejected before anything changes.
    pub async fn switch_named(&self, name: &str) -> SessionResult<()> {
        let kind: FlowKind = name.parse()?;
        self.switch(kind).await
    }

    #[instrument(skip(self), fields(mode = %kind))]
    pub async fn switch(&self, kind: FlowKind) -> SessionResult<()> {
        let session = self.session;
        let Some(_guard) = session.begin_navigation() else {
            debug!(mode = %kind, "navigation in flight, dropping flow switch");
            return Ok(());
        };

        // Captured before anything is torn down.
        let captured = session.current_location();

        if let Err(err) = session.preferences().set_flow(kind) {
            warn!(?err, "failed to persist flow preference");
        }
        let previous = std::mem::replace(&mut session.settings.lock().flow, kind);

        if session.active_adapter().is_none() {
            debug!(mode = %kind, "no open book, preference updated");
            session
                .observers
                .emit(SessionEvent::FlowModeChanged { mode: kind });
            return Ok(());
        }

        info!(from = %previous, to = %kind, location = ?captured, "switching flow mode");
        if let Err(err) = session.rebuild_surface(captured).await {
            // The requested flow never took effect.
            session.settings.lock().flow = previous;
            if let Err(err) = session.preferences().set_flow(previous) {
                warn!(?err, "failed to restore flow preference");
            }
            warn!(error = %err, mode = %previous, "flow switch failed, keeping the previous mode");
            return Err(err);
        }
        session
            .observers
            .emit(SessionEvent::FlowModeChanged { mode: kind });
        Ok(())
    }
}

impl ReadingSession {
    pub async fn switch_flow(&self, kind: FlowKind) -> SessionResult<()> {
        ModeSwitchCoordinator::new(self).switch(kind).await
    }

    pub async fn switch_flow_named(&self, name: &str) -> SessionResult<()> {
        ModeSwitchCoordinator::new(self).switch_named(name).await
    }

    pub async fn toggle_flow(&self) -> SessionResult<()> {
        let next = self.flow_kind().other();
        self.switch_flow(next).await
    }
}
