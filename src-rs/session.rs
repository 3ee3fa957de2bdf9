//! Analysis session as a sequence of immutable snapshots.
//!
//! Each transition returns a new [`Snapshot`]; nothing is mutated in place.
//! The [`Store`] holds the current snapshot and hands every new one to its
//! subscribed [`View`]s. A view that fails to present a snapshot moves the
//! session to `Failed` with that error.

use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::client::Analyze;
use crate::error::{Error, Result};
use crate::schema::AnalysisResult;

#[derive(Clone, PartialEq)]
pub struct SelectedFile {
    pub name: String,
    pub bytes: Arc<[u8]>,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

impl fmt::Debug for SelectedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectedFile")
            .field("name", &self.name)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Identifies one outstanding analysis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Idle,
    FileSelected,
    Analyzing { request: u64 },
    Reported(Arc<AnalysisResult>),
    Failed(Error),
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::FileSelected => "file_selected",
            Phase::Analyzing { .. } => "analyzing",
            Phase::Reported(_) => "reported",
            Phase::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    file: Option<Arc<SelectedFile>>,
    phase: Phase,
    last_request: u64,
    revision: u64,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::idle()
    }
}

impl Snapshot {
    pub fn idle() -> Self {
        Self {
            file: None,
            phase: Phase::Idle,
            last_request: 0,
            revision: 0,
        }
    }

    pub fn file(&self) -> Option<&SelectedFile> {
        self.file.as_deref()
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.phase, Phase::Analyzing { .. })
    }

    #[cfg(test)]
    pub fn result(&self) -> Option<&AnalysisResult> {
        match &self.phase {
            Phase::Reported(result) => Some(result.as_ref()),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match &self.phase {
            Phase::Failed(err) => Some(err),
            _ => None,
        }
    }

    fn next(&self, file: Option<Arc<SelectedFile>>, phase: Phase) -> Self {
        Self {
            file,
            phase,
            last_request: self.last_request,
            revision: self.revision + 1,
        }
    }

    /// Replace the selected file, discarding any result or error.
    /// Ignored while a request is in flight.
    pub fn select_file(&self, file: SelectedFile) -> Self {
        if self.is_busy() {
            warn!("ignoring file selection while an analysis is in flight");
            return self.clone();
        }
        self.next(Some(Arc::new(file)), Phase::FileSelected)
    }

    /// Start an analysis of the selected file.
    ///
    /// Without a file this yields `Failed(NoFileSelected)` and no ticket.
    /// While another request is outstanding the snapshot is returned
    /// unchanged and no ticket is issued.
    pub fn begin_analysis(&self) -> (Self, Option<Ticket>) {
        if self.is_busy() {
            warn!("analysis already in flight; request ignored");
            return (self.clone(), None);
        }
        if self.file.is_none() {
            return (
                self.next(None, Phase::Failed(Error::NoFileSelected)),
                None,
            );
        }
        let request = self.last_request + 1;
        let mut next = self.next(self.file.clone(), Phase::Analyzing { request });
        next.last_request = request;
        (next, Some(Ticket(request)))
    }

    /// Settle the request identified by `ticket`. Stale tickets are ignored.
    pub fn finish(&self, ticket: Ticket, outcome: Result<AnalysisResult>) -> Self {
        match self.phase {
            Phase::Analyzing { request } if request == ticket.0 => {}
            _ => {
                warn!("ignoring completion of stale request {}", ticket.0);
                return self.clone();
            }
        }
        let phase = match outcome {
            Ok(result) => Phase::Reported(Arc::new(result)),
            Err(err) => Phase::Failed(err),
        };
        self.next(self.file.clone(), phase)
    }

    /// Move to `Failed`, dropping any displayed result.
    pub fn fail(&self, error: Error) -> Self {
        self.next(self.file.clone(), Phase::Failed(error))
    }
}

/// Receives every new snapshot. Presenting must depend on the snapshot only.
pub trait View {
    fn present(&mut self, snapshot: &Snapshot) -> Result<()>;
}

#[derive(Default)]
pub struct Store {
    current: Snapshot,
    views: Vec<Box<dyn View>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, mut view: Box<dyn View>) {
        if let Err(err) = view.present(&self.current) {
            warn!("view rejected initial snapshot: {err}");
        }
        self.views.push(view);
    }

    pub fn dispatch(&mut self, transition: impl FnOnce(&Snapshot) -> Snapshot) -> &Snapshot {
        let next = transition(&self.current);
        if next.revision != self.current.revision {
            debug!(
                "session {} -> {}",
                self.current.phase.name(),
                next.phase.name()
            );
            self.current = next;
            self.notify();
        }
        &self.current
    }

    pub fn select_file(&mut self, file: SelectedFile) -> &Snapshot {
        self.dispatch(|s| s.select_file(file))
    }

    pub fn begin_analysis(&mut self) -> Option<Ticket> {
        let (next, ticket) = self.current.begin_analysis();
        self.dispatch(|_| next);
        ticket
    }

    pub fn finish(&mut self, ticket: Ticket, outcome: Result<AnalysisResult>) -> &Snapshot {
        self.dispatch(|s| s.finish(ticket, outcome))
    }

    /// Run one analysis of the selected file through `analyzer`.
    pub fn analyze_with(&mut self, analyzer: &dyn Analyze) -> &Snapshot {
        let Some(ticket) = self.begin_analysis() else {
            return &self.current;
        };
        let Some(file) = self.current.file.clone() else {
            return &self.current;
        };
        info!("analyzing {}", file.name);
        let outcome = analyzer.analyze(&file.bytes, &file.name);
        self.finish(ticket, outcome)
    }

    fn notify(&mut self) {
        let snapshot = self.current.clone();
        let mut failure = None;
        for view in &mut self.views {
            if let Err(err) = view.present(&snapshot) {
                failure = Some(err);
                break;
            }
        }
        let Some(err) = failure else {
            return;
        };
        if snapshot.error().is_some() {
            warn!("view could not present failure state: {err}");
            return;
        }
        warn!("presenting {} failed: {err}", snapshot.phase.name());
        self.current = snapshot.fail(err);
        let failed = self.current.clone();
        for view in &mut self.views {
            if let Err(err) = view.present(&failed) {
                warn!("view could not present failure state: {err}");
            }
        }
    }
}
