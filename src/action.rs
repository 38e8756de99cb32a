//! Reciprocal action descriptors
//!
//! Each social mutation is a pure descriptor: the guard under which it
//! applies, the forward mutation, the paired counter deltas on actor and
//! target, and how a held guard that did not apply maps back to an
//! outcome. The ledger interprets descriptors against one store; the
//! coordinator fans them out across both.

use crate::classify::StoreOutcome;
use crate::store::{CounterField, EntityKey, Filter, Guard, Mutation, PostTarget};

/// Discriminant used for logging, events and per-key serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Follow,
    Unfollow,
    CollectMarket,
    UncollectMarket,
    Digg,
    Diss,
    PublishTopic,
    PublishComment,
    ReadNotification,
}

/// Serialization key: concurrent executions of the same logical mutation
/// take the same key and are forced through one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionKey {
    pub kind: ActionKind,
    pub actor_ids: [u64; 2],
    pub target_id: u64,
}

/// One social mutation, described as data.
#[derive(Debug, Clone)]
pub enum ReciprocalAction {
    Follow { followee_id: u64 },
    Unfollow { followee_id: u64 },
    CollectMarket { market_id: u64 },
    UncollectMarket { market_id: u64 },
    Digg { target: PostTarget },
    Diss { target: PostTarget },
    PublishTopic { title: String, content: String },
    PublishComment { target: PostTarget, content: String },
    ReadNotification { notification_id: u64 },
}

impl ReciprocalAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            ReciprocalAction::Follow { .. } => ActionKind::Follow,
            ReciprocalAction::Unfollow { .. } => ActionKind::Unfollow,
            ReciprocalAction::CollectMarket { .. } => ActionKind::CollectMarket,
            ReciprocalAction::UncollectMarket { .. } => ActionKind::UncollectMarket,
            ReciprocalAction::Digg { .. } => ActionKind::Digg,
            ReciprocalAction::Diss { .. } => ActionKind::Diss,
            ReciprocalAction::PublishTopic { .. } => ActionKind::PublishTopic,
            ReciprocalAction::PublishComment { .. } => ActionKind::PublishComment,
            ReciprocalAction::ReadNotification { .. } => ActionKind::ReadNotification,
        }
    }

    /// The counterpart entity id, `0` when the action has none.
    pub fn target_id(&self) -> u64 {
        match self {
            ReciprocalAction::Follow { followee_id }
            | ReciprocalAction::Unfollow { followee_id } => *followee_id,
            ReciprocalAction::CollectMarket { market_id }
            | ReciprocalAction::UncollectMarket { market_id } => *market_id,
            ReciprocalAction::Digg { target } | ReciprocalAction::Diss { target } => target.id(),
            ReciprocalAction::PublishTopic { .. } => 0,
            ReciprocalAction::PublishComment { target, .. } => target.id(),
            ReciprocalAction::ReadNotification { notification_id } => *notification_id,
        }
    }

    /// Whether the action needs a positive, existence-checkable target.
    pub fn requires_target(&self) -> bool {
        !matches!(self, ReciprocalAction::PublishTopic { .. })
    }

    /// Per-key serialization key for this action by these actors.
    pub fn key(&self, actor_ids: [u64; 2]) -> ActionKey {
        ActionKey {
            kind: self.kind(),
            actor_ids,
            target_id: self.target_id(),
        }
    }

    /// Existence predicate checked before mutating, if any.
    ///
    /// Unfollow and uncollect skip the check: their own guard already
    /// distinguishes "nothing to undo", and the counterpart may have been
    /// deleted since the edge was made.
    pub fn existence_filter(&self, actor_id: u64) -> Option<Filter> {
        match self {
            ReciprocalAction::Follow { followee_id } => {
                Some(Filter::UserExists { id: *followee_id })
            }
            ReciprocalAction::CollectMarket { market_id } => {
                Some(Filter::MarketExists { id: *market_id })
            }
            ReciprocalAction::Digg { target }
            | ReciprocalAction::Diss { target }
            | ReciprocalAction::PublishComment { target, .. } => {
                Some(Filter::PostExists { target: *target })
            }
            ReciprocalAction::ReadNotification { notification_id } => Some(Filter::Notification {
                id: *notification_id,
                recipient_id: actor_id,
            }),
            ReciprocalAction::Unfollow { .. }
            | ReciprocalAction::UncollectMarket { .. }
            | ReciprocalAction::PublishTopic { .. } => None,
        }
    }

    /// The guarded forward mutation, if the action has one.
    ///
    /// Digg and diss are pure counter bumps and return `None`.
    pub fn conditional_mutation(&self, actor_id: u64) -> Option<(Guard, Mutation)> {
        match self {
            ReciprocalAction::Follow { followee_id } => Some((
                Guard::Absent(Filter::FollowEdge {
                    follower_id: actor_id,
                    followee_id: *followee_id,
                }),
                Mutation::CreateFollowEdge {
                    follower_id: actor_id,
                    followee_id: *followee_id,
                },
            )),
            ReciprocalAction::Unfollow { followee_id } => Some((
                Guard::Present(Filter::FollowEdge {
                    follower_id: actor_id,
                    followee_id: *followee_id,
                }),
                Mutation::DeleteFollowEdge {
                    follower_id: actor_id,
                    followee_id: *followee_id,
                },
            )),
            ReciprocalAction::CollectMarket { market_id } => Some((
                Guard::Absent(Filter::CollectionMember {
                    user_id: actor_id,
                    market_id: *market_id,
                }),
                Mutation::AddCollectionMember {
                    user_id: actor_id,
                    market_id: *market_id,
                },
            )),
            ReciprocalAction::UncollectMarket { market_id } => Some((
                Guard::Present(Filter::CollectionMember {
                    user_id: actor_id,
                    market_id: *market_id,
                }),
                Mutation::RemoveCollectionMember {
                    user_id: actor_id,
                    market_id: *market_id,
                },
            )),
            ReciprocalAction::Digg { .. } | ReciprocalAction::Diss { .. } => None,
            ReciprocalAction::PublishTopic { title, content } => Some((
                Guard::Unconditional,
                Mutation::InsertTopic {
                    author_id: actor_id,
                    title: title.clone(),
                    content: content.clone(),
                },
            )),
            ReciprocalAction::PublishComment { target, content } => Some((
                Guard::Present(Filter::PostExists { target: *target }),
                Mutation::InsertComment {
                    author_id: actor_id,
                    target: *target,
                    content: content.clone(),
                },
            )),
            ReciprocalAction::ReadNotification { notification_id } => Some((
                Guard::Present(Filter::Notification {
                    id: *notification_id,
                    recipient_id: actor_id,
                }),
                Mutation::MarkNotificationRead {
                    id: *notification_id,
                    recipient_id: actor_id,
                },
            )),
        }
    }

    /// Outcome when the conditional write reports the guard did not hold.
    pub fn on_not_applied(&self) -> StoreOutcome {
        match self {
            ReciprocalAction::Follow { .. } | ReciprocalAction::CollectMarket { .. } => {
                StoreOutcome::AlreadyDone
            }
            ReciprocalAction::Unfollow { .. } | ReciprocalAction::UncollectMarket { .. } => {
                StoreOutcome::NotDone
            }
            // The target vanished between the existence check and the write.
            ReciprocalAction::PublishComment { .. } => StoreOutcome::TargetMissing,
            // Re-reading a read notification is a no-op success.
            ReciprocalAction::ReadNotification { .. } => StoreOutcome::Ok,
            // Unconditional or guard-free actions never report not-applied.
            ReciprocalAction::Digg { .. }
            | ReciprocalAction::Diss { .. }
            | ReciprocalAction::PublishTopic { .. } => StoreOutcome::Ok,
        }
    }

    /// Paired counter deltas applied once the forward mutation holds.
    pub fn counter_deltas(&self, actor_id: u64) -> Vec<(EntityKey, CounterField, i64)> {
        match self {
            ReciprocalAction::Follow { followee_id } => vec![
                (EntityKey::User(actor_id), CounterField::FollowNum, 1),
                (EntityKey::User(*followee_id), CounterField::FollowerNum, 1),
            ],
            ReciprocalAction::Unfollow { followee_id } => vec![
                (EntityKey::User(actor_id), CounterField::FollowNum, -1),
                (EntityKey::User(*followee_id), CounterField::FollowerNum, -1),
            ],
            ReciprocalAction::CollectMarket { .. } => vec![(
                EntityKey::User(actor_id),
                CounterField::CollectedMarketNum,
                1,
            )],
            ReciprocalAction::UncollectMarket { .. } => vec![(
                EntityKey::User(actor_id),
                CounterField::CollectedMarketNum,
                -1,
            )],
            ReciprocalAction::Digg { target } => {
                vec![(EntityKey::from_post(*target), CounterField::DiggNum, 1)]
            }
            ReciprocalAction::Diss { target } => {
                vec![(EntityKey::from_post(*target), CounterField::DissNum, 1)]
            }
            ReciprocalAction::PublishTopic { .. } => {
                vec![(EntityKey::User(actor_id), CounterField::TopicNum, 1)]
            }
            ReciprocalAction::PublishComment { target, .. } => {
                vec![(EntityKey::from_post(*target), CounterField::CommentNum, 1)]
            }
            ReciprocalAction::ReadNotification { .. } => Vec::new(),
        }
    }
}
