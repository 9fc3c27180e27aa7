use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::forms::TweetForm;
use crate::models::{HomePage, LikeCount, Tweet, TweetPage, TweetRequest, User};
use crate::store::Store;

pub const NOT_TWEET_OWNER: &str = "You can only delete your own tweets";

/// Only the author may delete a tweet
pub fn can_delete(actor: &User, tweet: &Tweet) -> bool {
    tweet.user_id == actor.id
}

pub struct TweetService {
    store: Arc<Store>,
}

impl TweetService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Every tweet, newest first, plus which of them `actor` has liked
    pub fn home(&self, actor: &User) -> AppResult<HomePage> {
        Ok(HomePage {
            tweets: self.store.list_tweets(None)?,
            user_like_list: self.store.liked_tweet_ids(actor.id)?,
        })
    }

    pub fn create(&self, author: &User, req: &TweetRequest) -> AppResult<Tweet> {
        let form = TweetForm::clean(req)?;
        let tweet = self.store.create_tweet(author.id, &form.content)?;
        log::info!("User {} posted tweet {}", author.username, tweet.id);
        Ok(tweet)
    }

    pub fn detail(&self, actor: &User, id: i64) -> AppResult<TweetPage> {
        let tweet = self.store.get_tweet(id)?;
        Ok(TweetPage {
            is_liked: self.store.has_liked(actor.id, tweet.id)?,
            liked_count: tweet.liked_count,
            tweet,
        })
    }

    /// Loads a tweet the actor is allowed to delete: 404 when missing, 403 when not theirs
    pub fn get_deletable(&self, actor: &User, id: i64) -> AppResult<Tweet> {
        let tweet = self.store.get_tweet(id)?;
        if !can_delete(actor, &tweet) {
            log::warn!(
                "User {} tried to delete tweet {} owned by {}",
                actor.username, tweet.id, tweet.username
            );
            return Err(AppError::Forbidden(NOT_TWEET_OWNER.to_string()));
        }
        Ok(tweet)
    }

    /// Deletes the tweet and its likes
    pub fn delete(&self, actor: &User, id: i64) -> AppResult<Tweet> {
        let tweet = self.get_deletable(actor, id)?;
        self.store.delete_tweet(tweet.id)?;
        log::info!("User {} deleted tweet {}", actor.username, tweet.id);
        Ok(tweet)
    }

    /// Records the like unless it already exists
    pub fn like(&self, actor: &User, id: i64) -> AppResult<LikeCount> {
        let tweet = self.store.get_tweet(id)?;
        if self.store.create_like(actor.id, tweet.id)? {
            log::debug!("User {} liked tweet {}", actor.username, tweet.id);
        }
        Ok(LikeCount {
            liked_count: self.store.count_likes(tweet.id)?,
        })
    }

    /// Removes the like if there is one
    pub fn unlike(&self, actor: &User, id: i64) -> AppResult<LikeCount> {
        let tweet = self.store.get_tweet(id)?;
        if self.store.delete_like(actor.id, tweet.id)? {
            log::debug!("User {} unliked tweet {}", actor.username, tweet.id);
        }
        Ok(LikeCount {
            liked_count: self.store.count_likes(tweet.id)?,
        })
    }
}
