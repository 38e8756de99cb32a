//! Request-handling glue
//!
//! Transport-agnostic operation surface: each method resolves the caller's
//! principals, validates parameters before any store is touched, runs the
//! coordinator, and maps the outcome onto the stable envelope codes of its
//! feature band. The HTTP layer in front of this is someone else's
//! problem.

use std::sync::Arc;

use crate::action::ReciprocalAction;
use crate::auth::Authenticator;
use crate::classify::ActionOutcome;
use crate::coordinator::MutationCoordinator;
use crate::envelope::{codes, Envelope};
use crate::error::ValidationError;
use crate::store::PostTarget;
use crate::validate::ValidationLimits;

/// Envelope codes and messages for one feature band.
struct Band {
    already_done: (i32, &'static str),
    not_done: (i32, &'static str),
    target_not_found: (i32, &'static str),
    general: (i32, &'static str),
}

const FOLLOW_BAND: Band = Band {
    already_done: (codes::ALREADY_FOLLOWING, "already following this user"),
    not_done: (codes::NOT_FOLLOWING, "not following this user"),
    target_not_found: (codes::BAD_FOLLOW_TARGET, "target user does not exist"),
    general: (codes::ACTION_GENERAL, "operation failed"),
};

const COLLECT_BAND: Band = Band {
    already_done: (codes::ALREADY_COLLECTED, "market is already collected"),
    not_done: (codes::NOT_COLLECTED, "market is not collected"),
    target_not_found: (codes::MARKET_NOT_FOUND, "market does not exist"),
    general: (codes::ACTION_GENERAL, "operation failed"),
};

const FORUM_BAND: Band = Band {
    already_done: (codes::FORUM_GENERAL, "operation failed"),
    not_done: (codes::FORUM_GENERAL, "operation failed"),
    target_not_found: (codes::BAD_POST_TARGET, "post does not exist"),
    general: (codes::FORUM_GENERAL, "operation failed"),
};

const NOTIFY_BAND: Band = Band {
    already_done: (codes::NOTIFY_GENERAL, "operation failed"),
    not_done: (codes::NOTIFY_GENERAL, "operation failed"),
    target_not_found: (codes::BAD_NOTIFY_ID, "notification does not exist"),
    general: (codes::NOTIFY_GENERAL, "operation failed"),
};

fn band_envelope(outcome: ActionOutcome, band: &Band) -> Envelope {
    match outcome {
        ActionOutcome::Ok => Envelope::ok(),
        ActionOutcome::AlreadyDone => Envelope::err(band.already_done.0, band.already_done.1),
        ActionOutcome::NotDone => Envelope::err(band.not_done.0, band.not_done.1),
        ActionOutcome::TargetNotFound => {
            Envelope::err(band.target_not_found.0, band.target_not_found.1)
        }
        ActionOutcome::PermissionDenied => Envelope::no_permission(),
        ActionOutcome::General => Envelope::err(band.general.0, band.general.1),
    }
}

fn validation_envelope(error: ValidationError) -> Envelope {
    let code = match error {
        ValidationError::TitleEmpty | ValidationError::TitleTooLong { .. } => {
            codes::TITLE_TOO_LONG
        }
        ValidationError::TitleForbiddenWord => codes::TITLE_FORBIDDEN,
        ValidationError::ContentEmpty | ValidationError::ContentTooLong { .. } => {
            codes::CONTENT_TOO_LONG
        }
        ValidationError::ContentForbiddenWord => codes::CONTENT_FORBIDDEN,
        ValidationError::BadPostType | ValidationError::BadTargetId => codes::BAD_POST_TARGET,
        ValidationError::SelfTarget => codes::BAD_FOLLOW_TARGET,
    };
    Envelope::err(code, error.to_string())
}

/// Operation surface for social actions.
pub struct ActionApi {
    coordinator: Arc<MutationCoordinator>,
    authenticator: Arc<dyn Authenticator>,
    limits: ValidationLimits,
}

impl ActionApi {
    pub fn new(
        coordinator: Arc<MutationCoordinator>,
        authenticator: Arc<dyn Authenticator>,
        limits: ValidationLimits,
    ) -> Self {
        Self {
            coordinator,
            authenticator,
            limits,
        }
    }

    pub async fn follow_user(&self, credential: &str, followee_id: u64) -> Envelope {
        let principals = self.authenticator.resolve(credential).await;
        if principals.is_empty() {
            return Envelope::no_permission();
        }
        if followee_id == 0 {
            return Envelope::err(codes::BAD_FOLLOW_TARGET, "target user id is invalid");
        }
        if principals.contains_id(followee_id) {
            return validation_envelope(ValidationError::SelfTarget);
        }

        let outcome = self
            .coordinator
            .execute(&ReciprocalAction::Follow { followee_id }, &principals)
            .await;
        band_envelope(outcome, &FOLLOW_BAND)
    }

    pub async fn unfollow_user(&self, credential: &str, followee_id: u64) -> Envelope {
        let principals = self.authenticator.resolve(credential).await;
        if principals.is_empty() {
            return Envelope::no_permission();
        }
        if followee_id == 0 {
            return Envelope::err(codes::BAD_FOLLOW_TARGET, "target user id is invalid");
        }

        let outcome = self
            .coordinator
            .execute(&ReciprocalAction::Unfollow { followee_id }, &principals)
            .await;
        band_envelope(outcome, &FOLLOW_BAND)
    }

    pub async fn collect_market(&self, credential: &str, market_id: u64) -> Envelope {
        let principals = self.authenticator.resolve(credential).await;
        if principals.is_empty() {
            return Envelope::no_permission();
        }
        if market_id == 0 {
            return Envelope::err(codes::MARKET_NOT_FOUND, "market id is invalid");
        }

        let outcome = self
            .coordinator
            .execute(&ReciprocalAction::CollectMarket { market_id }, &principals)
            .await;
        band_envelope(outcome, &COLLECT_BAND)
    }

    pub async fn uncollect_market(&self, credential: &str, market_id: u64) -> Envelope {
        let principals = self.authenticator.resolve(credential).await;
        if principals.is_empty() {
            return Envelope::no_permission();
        }
        if market_id == 0 {
            return Envelope::err(codes::MARKET_NOT_FOUND, "market id is invalid");
        }

        let outcome = self
            .coordinator
            .execute(&ReciprocalAction::UncollectMarket { market_id }, &principals)
            .await;
        band_envelope(outcome, &COLLECT_BAND)
    }

    pub async fn digg_post(&self, credential: &str, post_type: u8, post_id: u64) -> Envelope {
        self.react_to_post(credential, post_type, post_id, false).await
    }

    pub async fn diss_post(&self, credential: &str, post_type: u8, post_id: u64) -> Envelope {
        self.react_to_post(credential, post_type, post_id, true).await
    }

    async fn react_to_post(
        &self,
        credential: &str,
        post_type: u8,
        post_id: u64,
        diss: bool,
    ) -> Envelope {
        let principals = self.authenticator.resolve(credential).await;
        if principals.is_empty() {
            return Envelope::no_permission();
        }
        let Some(target) = PostTarget::from_wire(post_type, post_id) else {
            return Envelope::err(codes::BAD_POST_TARGET, "post type must be 0 or 1");
        };
        if post_id == 0 {
            return Envelope::err(codes::BAD_POST_TARGET, "post id is invalid");
        }

        let action = if diss {
            ReciprocalAction::Diss { target }
        } else {
            ReciprocalAction::Digg { target }
        };
        let outcome = self.coordinator.execute(&action, &principals).await;
        band_envelope(outcome, &FORUM_BAND)
    }

    pub async fn publish_topic(&self, credential: &str, title: &str, content: &str) -> Envelope {
        let principals = self.authenticator.resolve(credential).await;
        if principals.is_empty() {
            return Envelope::no_permission();
        }
        if let Err(error) = self.limits.validate_topic(title, content) {
            return validation_envelope(error);
        }

        let outcome = self
            .coordinator
            .execute(
                &ReciprocalAction::PublishTopic {
                    title: title.to_string(),
                    content: content.to_string(),
                },
                &principals,
            )
            .await;
        band_envelope(outcome, &FORUM_BAND)
    }

    pub async fn publish_comment(
        &self,
        credential: &str,
        post_type: u8,
        post_id: u64,
        content: &str,
    ) -> Envelope {
        let principals = self.authenticator.resolve(credential).await;
        if principals.is_empty() {
            return Envelope::no_permission();
        }
        let Some(target) = PostTarget::from_wire(post_type, post_id) else {
            return Envelope::err(codes::BAD_POST_TARGET, "post type must be 0 or 1");
        };
        if post_id == 0 {
            return Envelope::err(codes::BAD_POST_TARGET, "post id is invalid");
        }
        if let Err(error) = self.limits.validate_content(content) {
            return validation_envelope(error);
        }

        let outcome = self
            .coordinator
            .execute(
                &ReciprocalAction::PublishComment {
                    target,
                    content: content.to_string(),
                },
                &principals,
            )
            .await;
        band_envelope(outcome, &FORUM_BAND)
    }

    pub async fn read_notification(&self, credential: &str, notification_id: u64) -> Envelope {
        let principals = self.authenticator.resolve(credential).await;
        if principals.is_empty() {
            return Envelope::no_permission();
        }
        if notification_id == 0 {
            return Envelope::err(codes::BAD_NOTIFY_ID, "notification id is invalid");
        }

        let outcome = self
            .coordinator
            .execute(
                &ReciprocalAction::ReadNotification { notification_id },
                &principals,
            )
            .await;
        band_envelope(outcome, &NOTIFY_BAND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Principal, PrincipalSet, StaticAuthenticator};
    use crate::events::EventBus;
    use crate::store::{MemoryStore, Store, StoreKind};
    use std::time::Duration;

    fn api() -> (ActionApi, Arc<MemoryStore>, Arc<MemoryStore>) {
        let doc = Arc::new(MemoryStore::new(StoreKind::Document));
        let rel = Arc::new(MemoryStore::new(StoreKind::Relational));
        for store in [&doc, &rel] {
            store.seed_user(1);
            store.seed_user(2);
            store.seed_market(7);
            store.seed_topic(10, 2, "btc", "discuss");
        }

        let coordinator = Arc::new(MutationCoordinator::new(
            vec![doc.clone() as Arc<dyn Store>, rel.clone() as Arc<dyn Store>],
            Arc::new(EventBus::new()),
            Duration::from_millis(200),
        ));
        let authenticator = Arc::new(StaticAuthenticator::new());
        authenticator.insert(
            "session-1",
            PrincipalSet::from_iter([
                Principal::new(1, StoreKind::Document),
                Principal::new(1, StoreKind::Relational),
            ]),
        );
        let limits = ValidationLimits {
            forbidden_words: vec!["spamword".to_string()],
            ..ValidationLimits::default()
        };
        (
            ActionApi::new(coordinator, authenticator, limits),
            doc,
            rel,
        )
    }

    #[tokio::test]
    async fn unauthenticated_requests_get_no_permission() {
        let (api, _, _) = api();
        let env = api.follow_user("bad-session", 2).await;
        assert_eq!(env.code, codes::NO_PERMISSION);
    }

    #[tokio::test]
    async fn follow_retry_unfollow_retry_scenario() {
        let (api, _, _) = api();

        assert_eq!(api.follow_user("session-1", 2).await.code, codes::SUCCESS);
        assert_eq!(
            api.follow_user("session-1", 2).await.code,
            codes::ALREADY_FOLLOWING
        );
        assert_eq!(api.unfollow_user("session-1", 2).await.code, codes::SUCCESS);
        assert_eq!(
            api.unfollow_user("session-1", 2).await.code,
            codes::NOT_FOLLOWING
        );
    }

    #[tokio::test]
    async fn self_follow_is_rejected() {
        let (api, doc, _) = api();
        let env = api.follow_user("session-1", 1).await;
        assert_eq!(env.code, codes::BAD_FOLLOW_TARGET);
        assert!(!doc.has_follow_edge(1, 1));
    }

    #[tokio::test]
    async fn collect_band_codes() {
        let (api, _, _) = api();
        assert_eq!(api.collect_market("session-1", 7).await.code, codes::SUCCESS);
        assert_eq!(
            api.collect_market("session-1", 7).await.code,
            codes::ALREADY_COLLECTED
        );
        assert_eq!(
            api.uncollect_market("session-1", 7).await.code,
            codes::SUCCESS
        );
        assert_eq!(
            api.uncollect_market("session-1", 7).await.code,
            codes::NOT_COLLECTED
        );
        assert_eq!(
            api.collect_market("session-1", 99).await.code,
            codes::MARKET_NOT_FOUND
        );
    }

    #[tokio::test]
    async fn forum_validation_codes() {
        let (api, _, _) = api();
        let long_title = "x".repeat(51);
        assert_eq!(
            api.publish_topic("session-1", &long_title, "body").await.code,
            codes::TITLE_TOO_LONG
        );
        assert_eq!(
            api.publish_topic("session-1", "title", "has spamword").await.code,
            codes::CONTENT_FORBIDDEN
        );
        assert_eq!(
            api.digg_post("session-1", 3, 10).await.code,
            codes::BAD_POST_TARGET
        );
        assert_eq!(
            api.digg_post("session-1", 0, 404).await.code,
            codes::BAD_POST_TARGET
        );
    }

    #[tokio::test]
    async fn digg_moves_counter_on_both_stores() {
        let (api, doc, rel) = api();
        assert_eq!(api.digg_post("session-1", 0, 10).await.code, codes::SUCCESS);
        assert_eq!(doc.post_counters(PostTarget::Topic(10)).unwrap().digg_num, 1);
        assert_eq!(rel.post_counters(PostTarget::Topic(10)).unwrap().digg_num, 1);
    }

    #[tokio::test]
    async fn publish_topic_bumps_author_counter() {
        let (api, doc, _) = api();
        assert_eq!(
            api.publish_topic("session-1", "eth merge", "thoughts?").await.code,
            codes::SUCCESS
        );
        assert_eq!(doc.user_counters(1).unwrap().topic_num, 1);
    }
}
