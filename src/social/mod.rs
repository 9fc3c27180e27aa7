//! Follow graph and profile aggregation.
//!
//! Self-follow and duplicate-follow are rejected here, before the store is
//! touched; the unique constraint on (follower, following) only catches
//! concurrent duplicates that slip past the existence check.

use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::models::{FollowListPage, FriendShip, ProfilePage, User, UserSummary};
use crate::store::{Store, StoreError};

pub const CANNOT_FOLLOW_SELF: &str = "You cannot follow yourself.";
pub const ALREADY_FOLLOWING: &str = "You already follow this user.";
pub const CANNOT_UNFOLLOW_SELF: &str = "You cannot unfollow yourself.";
pub const NOT_FOLLOWING: &str = "You do not follow this user.";

pub fn profile_url(username: &str) -> String {
    format!("/users/{}", username)
}

pub struct SocialGraph {
    store: Arc<Store>,
}

impl SocialGraph {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// `actor` starts following `target_username`
    pub fn follow(&self, actor: &User, target_username: &str) -> AppResult<FriendShip> {
        let target = self.store.get_user_by_username(target_username)?;
        let redirect = profile_url(&target.username);

        if target == *actor {
            return Err(AppError::bad_request(CANNOT_FOLLOW_SELF, redirect));
        }

        if self.store.friendship_exists(actor.id, target.id)? {
            return Err(AppError::bad_request(ALREADY_FOLLOWING, redirect));
        }

        self.insert_edge(actor, &target)
    }

    /// Inserts the edge; a duplicate that raced past the existence check
    /// is reported the same way as a plain double follow
    fn insert_edge(&self, actor: &User, target: &User) -> AppResult<FriendShip> {
        match self.store.create_friendship(actor.id, target.id) {
            Ok(edge) => {
                log::info!("{} followed {}", actor.username, target.username);
                Ok(edge)
            }
            Err(StoreError::Conflict(_)) => Err(AppError::bad_request(
                ALREADY_FOLLOWING,
                profile_url(&target.username),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// `actor` stops following `target_username`; returns the target
    pub fn unfollow(&self, actor: &User, target_username: &str) -> AppResult<User> {
        let target = self.store.get_user_by_username(target_username)?;
        let redirect = profile_url(&target.username);

        if target == *actor {
            return Err(AppError::bad_request(CANNOT_UNFOLLOW_SELF, redirect));
        }

        if !self.store.delete_friendship(actor.id, target.id)? {
            return Err(AppError::bad_request(NOT_FOLLOWING, redirect));
        }

        log::info!("{} unfollowed {}", actor.username, target.username);
        Ok(target)
    }

    /// Who `username` follows, most recent first
    pub fn following(&self, username: &str) -> AppResult<FollowListPage> {
        let user = self.store.get_user_by_username(username)?;
        Ok(FollowListPage {
            user: UserSummary::from(&user),
            entries: self.store.list_following(user.id)?,
        })
    }

    /// Who follows `username`, most recent first
    pub fn followers(&self, username: &str) -> AppResult<FollowListPage> {
        let user = self.store.get_user_by_username(username)?;
        Ok(FollowListPage {
            user: UserSummary::from(&user),
            entries: self.store.list_followers(user.id)?,
        })
    }

    pub fn profile(&self, actor: &User, username: &str) -> AppResult<ProfilePage> {
        let user = self.store.get_user_by_username(username)?;
        Ok(ProfilePage {
            tweets: self.store.list_tweets(Some(user.id))?,
            is_following: self.store.friendship_exists(actor.id, user.id)?,
            following_num: self.store.count_following(user.id)?,
            followers_num: self.store.count_followers(user.id)?,
            user: UserSummary::from(&user),
        })
    }
}
