//! Commands module for the acquireq CLI
//!
//! [`App`] wires the configured store, publisher and engine together;
//! [`execute`] runs one [`Request`] against it. Both the one-shot
//! subcommands and `serve` go through `execute`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod protocol;
pub mod serve;

use std::sync::Arc;

use acquireq_core::{
    BroadcastPublisher, ClaimantInfo, Config, LeaseEngine, LeaseStore, NewResource, RecoveryReport,
    SqliteStore,
};

pub use protocol::{ErrorBody, Line, Outcome, Request};

/// A recovered engine plus what it was built from
#[derive(Clone)]
pub struct App {
    pub engine: LeaseEngine,
    pub publisher: BroadcastPublisher,
    pub config: Config,
}

impl App {
    /// Open the configured database and recover offer timers
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or recovery fails
    pub async fn open(config: Config) -> acquireq_core::Result<(Self, RecoveryReport)> {
        let store = SqliteStore::open(&config.database_path).await?;
        Self::with_store(config, Arc::new(store)).await
    }

    /// Build on an existing store and recover offer timers
    ///
    /// # Errors
    ///
    /// Returns an error if recovery fails
    pub async fn with_store(
        config: Config,
        store: Arc<dyn LeaseStore>,
    ) -> acquireq_core::Result<(Self, RecoveryReport)> {
        let publisher = BroadcastPublisher::new(config.snapshot_buffer);
        let engine = LeaseEngine::new(store, Arc::new(publisher.clone()));
        let report = engine.recover().await?;
        Ok((
            Self {
                engine,
                publisher,
                config,
            },
            report,
        ))
    }
}

/// Run one request.
///
/// `subscribe` only validates the resource here; streaming is the
/// transport's job.
///
/// # Errors
///
/// Returns the engine's error for unknown resources, invalid input or
/// store failures.
pub async fn execute(app: &App, request: Request) -> acquireq_core::Result<Outcome> {
    let engine = &app.engine;
    match request {
        Request::Create {
            name,
            description,
            offer_duration_secs,
        } => {
            let mut new = NewResource::new(name).with_offer_duration(
                offer_duration_secs.unwrap_or(app.config.default_offer_duration_secs),
            );
            if let Some(description) = description {
                new = new.with_description(description);
            }
            engine.create_resource(new).await.map(Outcome::Created)
        }
        Request::Join {
            resource_id,
            label,
            contact,
            claimant_id,
        } => {
            let info = ClaimantInfo {
                id: claimant_id,
                label,
                contact,
            };
            engine
                .join(&resource_id, info)
                .await
                .map(|claimant_id| Outcome::Joined { claimant_id })
        }
        Request::Release {
            resource_id,
            claimant_id,
        } => applied(engine.release(&resource_id, claimant_id).await),
        Request::Accept {
            resource_id,
            claimant_id,
        } => applied(engine.accept(&resource_id, claimant_id).await),
        Request::Reject {
            resource_id,
            claimant_id,
        } => applied(engine.reject(&resource_id, claimant_id).await),
        Request::Leave {
            resource_id,
            claimant_id,
        } => applied(engine.leave(&resource_id, claimant_id).await),
        Request::Status { resource_id } => engine.snapshot(&resource_id).await.map(Outcome::Status),
        Request::Subscribe { resource_id } => {
            engine.snapshot(&resource_id).await?;
            Ok(Outcome::Subscribed { resource_id })
        }
        Request::Sweep => engine
            .sweep_expired()
            .await
            .map(|expired| Outcome::Swept { expired }),
    }
}

fn applied(result: acquireq_core::Result<bool>) -> acquireq_core::Result<Outcome> {
    result.map(|applied| Outcome::Applied { applied })
}


#[cfg(test)]
mod tests {
    use acquireq_core::{ClaimantId, Error, ResourceId};

    use super::test_support::memory_app;
    use super::*;

    async fn create(app: &App, offer_duration_secs: Option<u32>) -> acquireq_core::Result<ResourceId> {
        match execute(
            app,
            Request::Create {
                name: "printer".into(),
                description: None,
                offer_duration_secs,
            },
        )
        .await?
        {
            Outcome::Created(created) => Ok(created.id),
            other => Err(Error::InvalidResource(format!("unexpected outcome {other:?}"))),
        }
    }

    #[tokio::test]
    async fn test_create_uses_configured_default_duration() -> acquireq_core::Result<()> {
        let app = memory_app().await?;
        let id = create(&app, None).await?;
        let status = execute(&app, Request::Status { resource_id: id }).await?;
        assert!(matches!(
            status,
            Outcome::Status(snapshot) if snapshot.offer_duration_seconds == 60
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_join_then_accept() -> acquireq_core::Result<()> {
        let app = memory_app().await?;
        let resource_id = create(&app, Some(30)).await?;

        let joined = execute(
            &app,
            Request::Join {
                resource_id: resource_id.clone(),
                label: "alice".into(),
                contact: None,
                claimant_id: None,
            },
        )
        .await?;
        let Outcome::Joined { claimant_id } = joined else {
            return Err(Error::InvalidResource(format!("unexpected outcome {joined:?}")));
        };

        let wrong = execute(
            &app,
            Request::Accept {
                resource_id: resource_id.clone(),
                claimant_id: ClaimantId::new(claimant_id.get() + 1),
            },
        )
        .await?;
        assert_eq!(wrong, Outcome::Applied { applied: false });

        let right = execute(
            &app,
            Request::Accept {
                resource_id,
                claimant_id,
            },
        )
        .await?;
        assert_eq!(right, Outcome::Applied { applied: true });
        Ok(())
    }

    #[tokio::test]
    async fn test_subscribe_unknown_resource_fails() -> acquireq_core::Result<()> {
        let app = memory_app().await?;
        let result = execute(
            &app,
            Request::Subscribe {
                resource_id: ResourceId::new("nope"),
            },
        )
        .await;
        assert!(matches!(result, Err(Error::ResourceNotFound(_))));
        Ok(())
    }
}
