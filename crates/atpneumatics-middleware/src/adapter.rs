//! The controller link seam.
//!
//! The CSC never touches sockets directly.  It hands command tokens to a
//! [`CommandLink`] and awaits the returned [`CommandIssued`].  The production
//! implementation is [`TcpipClient`][crate::client::TcpipClient]; tests plug in
//! links that answer, reject, or never answer.

use async_trait::async_trait;
use atpneumatics_types::PneumaticsError;
use tokio::sync::oneshot;

/// Every controller transport must implement this trait.
#[async_trait]
pub trait CommandLink: Send + Sync {
    /// Send the command `id` (a `cmd_*` token) with an optional `pressure`
    /// argument.
    ///
    /// Resolves as soon as the command has been written; completion is
    /// reported through [`CommandIssued::done`].
    async fn write_command(
        &self,
        id: &str,
        pressure: Option<f64>,
    ) -> Result<CommandIssued, PneumaticsError>;

    /// `true` while the link can carry commands.
    fn connected(&self) -> bool;

    /// Close the link.  Outstanding commands fail with
    /// [`PneumaticsError::NotConnected`].
    async fn close(&self);
}

type Abandon = Box<dyn FnOnce(u64) + Send + Sync>;

/// Handle to a command that has been written to the controller.
///
/// Dropping the handle before [`done`][Self::done] resolves (e.g. because the
/// caller's timeout fired) runs the link's abandon hook, so the link can
/// forget the command.
pub struct CommandIssued {
    sequence_id: u64,
    done: Option<oneshot::Receiver<Result<(), PneumaticsError>>>,
    abandon: Option<Abandon>,
}

impl CommandIssued {
    pub fn new(sequence_id: u64, done: oneshot::Receiver<Result<(), PneumaticsError>>) -> Self {
        Self {
            sequence_id,
            done: Some(done),
            abandon: None,
        }
    }

    /// Call `abandon(sequence_id)` if this handle is dropped unresolved.
    pub fn on_abandon(mut self, abandon: impl FnOnce(u64) + Send + Sync + 'static) -> Self {
        self.abandon = Some(Box::new(abandon));
        self
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    /// Wait until the controller reports completion.
    ///
    /// # Errors
    ///
    /// - [`PneumaticsError::CommandRejected`] – the controller answered
    ///   `noack` or `fail`.
    /// - [`PneumaticsError::NotConnected`] – the link closed first.
    pub async fn done(mut self) -> Result<(), PneumaticsError> {
        let Some(done) = self.done.take() else {
            return Err(PneumaticsError::NotConnected);
        };
        let result = match done.await {
            Ok(result) => result,
            Err(_) => Err(PneumaticsError::NotConnected),
        };
        self.abandon = None;
        result
    }
}

impl std::fmt::Debug for CommandIssued {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandIssued")
            .field("sequence_id", &self.sequence_id)
            .field("resolved", &self.abandon.is_none())
            .finish()
    }
}

impl Drop for CommandIssued {
    fn drop(&mut self) {
        if let Some(abandon) = self.abandon.take() {
            abandon(self.sequence_id);
        }
    }
}
