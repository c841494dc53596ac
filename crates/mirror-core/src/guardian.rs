//! Session guardian: keeps the reconciler running across one session loss.

use crate::fs::FileSystem;
use crate::reconciler::{LoopError, Pacer, Reconciler};
use crate::transport::{Connector, Session, SessionIdentity, TransportError};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum GuardianError {
    /// Session lost and keep-alive is off.
    #[error("Session lost: {0}")]
    SessionLost(#[source] TransportError),

    /// The single reconnect attempt failed.
    #[error("Session lost ({lost}) and reconnecting failed: {source}")]
    ReconnectFailed {
        lost: TransportError,
        #[source]
        source: TransportError,
    },

    /// The session was lost again after the single reconnect.
    #[error("Session lost again after reconnecting: {0}")]
    LostAfterReconnect(#[source] TransportError),

    /// Anything that is not a session failure.
    #[error(transparent)]
    Loop(LoopError),
}

#[derive(Debug, Clone)]
pub struct GuardianConfig {
    pub identity: SessionIdentity,
    /// Reconnect once when the session is lost. A second loss is fatal.
    pub keep_alive: bool,
}

/// How a supervised run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardianSummary {
    /// Cycles completed across all sessions.
    pub cycles: u64,
    pub reconnects: u32,
}

pub struct SessionGuardian<C: Connector> {
    connector: C,
    config: GuardianConfig,
}

impl<C: Connector> SessionGuardian<C> {
    pub fn new(connector: C, config: GuardianConfig) -> Self {
        Self { connector, config }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.config.identity
    }

    /// Open the first session.
    pub async fn connect(&self) -> Result<Box<dyn Session>, TransportError> {
        info!("Connecting to {}...", self.config.identity);
        let session = self.connector.connect(&self.config.identity).await?;
        info!("Successfully connected to remote.");
        Ok(session)
    }

    /// Run the reconciler on `session` until the pacer stops it or the session
    /// is lost for good. The session is closed on every exit path.
    ///
    /// After a reconnect the reconciler keeps the snapshot it held when the
    /// session died, so unchanged files are not announced again. At most one
    /// reconnect is attempted per run; any later loss propagates.
    pub async fn supervise<F: FileSystem>(
        &self,
        reconciler: &mut Reconciler<F>,
        mut session: Box<dyn Session>,
        pacer: &mut dyn Pacer,
    ) -> Result<GuardianSummary, GuardianError> {
        let start = reconciler.cycles();
        let mut reconnects = 0;

        loop {
            let lost = match reconciler.run(session.as_mut(), pacer).await {
                Ok(_) => {
                    session.close().await;
                    return Ok(GuardianSummary {
                        cycles: reconciler.cycles() - start,
                        reconnects,
                    });
                }
                Err(LoopError::SessionLost(lost)) => lost,
                Err(other) => {
                    session.close().await;
                    return Err(GuardianError::Loop(other));
                }
            };

            session.close().await;

            if !self.config.keep_alive {
                error!("Session lost and keep-alive is disabled: {}", lost);
                return Err(GuardianError::SessionLost(lost));
            }
            if reconnects > 0 {
                error!("Session lost again after reconnecting: {}", lost);
                return Err(GuardianError::LostAfterReconnect(lost));
            }

            warn!("Session lost ({}), reconnecting to {}...", lost, self.config.identity);
            session = match self.connector.connect(&self.config.identity).await {
                Ok(session) => session,
                Err(source) => {
                    error!("Reconnect failed: {}", source);
                    return Err(GuardianError::ReconnectFailed { lost, source });
                }
            };
            reconnects += 1;
            info!(
                "Reconnected; resuming with the last snapshot ({} file(s))",
                reconciler.snapshot().len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use crate::layout::MirrorLayout;
    use crate::memory::{MemoryRemote, RemoteOp};
    use crate::reconciler::ReconcilerConfig;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Stop;

    #[async_trait]
    impl Pacer for Stop {
        async fn pause(&mut self) -> bool {
            false
        }
    }

    fn guardian(remote: &MemoryRemote, keep_alive: bool) -> SessionGuardian<crate::memory::MemoryConnector> {
        SessionGuardian::new(
            remote.connector(),
            GuardianConfig {
                identity: SessionIdentity {
                    host: "host".into(),
                    user: "user".into(),
                    secret: None,
                    remote_root: "/srv/proj".into(),
                },
                keep_alive,
            },
        )
    }

    async fn reconciler(fs: &Arc<InMemoryFs>) -> Reconciler<Arc<InMemoryFs>> {
        let config =
            ReconcilerConfig::new(MirrorLayout::from_remote_dir("/srv/proj").unwrap(), ".");
        Reconciler::with_baseline(Arc::clone(fs), config).await.unwrap()
    }

    #[tokio::test]
    async fn test_clean_stop_closes_session() {
        let fs = Arc::new(InMemoryFs::new());
        fs.mkdir("proj");
        let mut reconciler = reconciler(&fs).await;
        let remote = MemoryRemote::new();
        let guardian = guardian(&remote, false);

        let session = guardian.connect().await.unwrap();
        let summary = guardian
            .supervise(&mut reconciler, session, &mut Stop)
            .await
            .unwrap();

        assert_eq!(summary, GuardianSummary { cycles: 1, reconnects: 0 });
        assert_eq!(remote.ops().last(), Some(&RemoteOp::Close));
    }

    #[tokio::test]
    async fn test_session_loss_without_keep_alive_terminates() {
        let fs = Arc::new(InMemoryFs::new());
        fs.mkdir("proj");
        let mut reconciler = reconciler(&fs).await;
        let remote = MemoryRemote::new();
        let guardian = guardian(&remote, false);
        let session = guardian.connect().await.unwrap();

        fs.write("proj/a.txt", b"");
        remote.drop_connection();
        let err = guardian
            .supervise(&mut reconciler, session, &mut Stop)
            .await
            .unwrap_err();

        assert!(matches!(err, GuardianError::SessionLost(_)));
        assert_eq!(remote.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_local_errors_are_not_retried() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("proj/a.txt", b"");
        let mut reconciler = Reconciler::new(
            Arc::clone(&fs),
            ReconcilerConfig::new(MirrorLayout::from_remote_dir("/srv/gone").unwrap(), "."),
            Default::default(),
        );
        let remote = MemoryRemote::new();
        let guardian = guardian(&remote, true);
        let session = guardian.connect().await.unwrap();

        let err = guardian
            .supervise(&mut reconciler, session, &mut Stop)
            .await
            .unwrap_err();

        assert!(matches!(err, GuardianError::Loop(LoopError::Capture { .. })));
        assert_eq!(remote.connect_count(), 1);
    }
}
