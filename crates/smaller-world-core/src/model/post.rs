//! Posts and the friend activity recorded against them.

use crate::error::ValidationErrors;
use crate::ids::{
    EncouragementId, FriendId, PostId, PostReactionId, PostReplyReceiptId, PostShareId,
    PostStickerId, PostViewId, TextBlastId, UserId,
};
use crate::model::{Notifiable, PostType, Visibility};
use crate::storage::impl_record;
use crate::text;
use crate::validate::is_emoji;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title snippets are truncated to this many characters.
pub const TITLE_SNIPPET_LENGTH: usize = 92;

/// Body snippets are truncated to this many characters.
pub const BODY_SNIPPET_LENGTH: usize = 120;

// =============================================================================
// POST
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub author_id: UserId,
    pub post_type: PostType,
    pub visibility: Visibility,
    pub title: Option<String>,
    pub body_html: String,
    pub emoji: Option<String>,
    /// Friends who may not see this post, whatever its visibility.
    pub hidden_from_ids: Vec<FriendId>,
    /// Audience of a `secret` post.
    pub visible_to_ids: Vec<FriendId>,
    pub pinned_until: Option<DateTime<Utc>>,
    pub quoted_post_id: Option<PostId>,
    pub encouragement_id: Option<EncouragementId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl_record!(Post, PostId, "posts", "post");

impl Post {
    /// Validation that needs only this record and the post it quotes.
    #[must_use]
    pub fn validate(&self, quoted_post: Option<&Post>) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if text::html_to_text(&self.body_html).trim().is_empty() {
            errors.add("body_html", "can't be blank");
        }
        if let Some(emoji) = &self.emoji
            && !is_emoji(emoji)
        {
            errors.add("emoji", "is not an emoji");
        }
        if self.title.is_some() && !self.post_type.title_visible() {
            errors.add("title", "must be blank");
        }
        match (self.post_type, self.quoted_post_id) {
            (PostType::FollowUp, None) => errors.add("quoted_post", "must exist"),
            (PostType::FollowUp, Some(_)) => {}
            (_, Some(_)) => errors.add("quoted_post", "must be blank"),
            (_, None) => {}
        }
        if let Some(quoted) = quoted_post
            && quoted.quoted_post_id.is_some()
        {
            errors.add("quoted_post", "cannot also contain a quoted post");
        }
        errors
    }

    /// Strip the title and drop a blank emoji, as done before every save.
    pub fn normalize(&mut self) {
        self.title = self
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_owned);
        self.emoji = self
            .emoji
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_owned);
    }

    /// Whether the author created this post after signing up, as opposed
    /// to the welcome post written with the world.
    #[must_use]
    pub fn user_created(&self, author_created_at: DateTime<Utc>) -> bool {
        self.updated_at > author_created_at + chrono::Duration::seconds(1)
    }

    #[must_use]
    pub fn pinned(&self, now: DateTime<Utc>) -> bool {
        self.pinned_until.is_some_and(|until| until > now)
    }

    // -------------------------------------------------------------------------
    // Snippets
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn body_text(&self) -> String {
        text::html_to_text(&self.body_html)
    }

    /// Emoji and title joined, if either is present.
    #[must_use]
    pub fn fun_title(&self) -> Option<String> {
        let parts: Vec<&str> = [self.emoji.as_deref(), self.title.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }

    #[must_use]
    pub fn title_snippet(&self) -> Option<String> {
        self.fun_title()
            .map(|title| text::snip(&text::truncate(title.trim(), TITLE_SNIPPET_LENGTH)))
    }

    #[must_use]
    pub fn truncated_body_text(&self) -> String {
        text::truncate(self.body_text().trim(), BODY_SNIPPET_LENGTH)
    }

    #[must_use]
    pub fn body_snippet(&self) -> String {
        text::snip(&self.truncated_body_text())
    }

    #[must_use]
    pub fn compact_body_snippet(&self) -> String {
        text::snip(&self.truncated_body_text().replace("\n\n", "\n"))
    }

    #[must_use]
    pub fn snippet(&self) -> String {
        join_snippet(self.title_snippet(), self.body_snippet())
    }

    #[must_use]
    pub fn compact_snippet(&self) -> String {
        join_snippet(self.title_snippet(), self.compact_body_snippet())
    }

    /// Snippet followed by a blank line, for prefilling replies.
    #[must_use]
    pub fn reply_snippet(&self) -> String {
        self.snippet() + "\n\n"
    }

    /// `{emoji} {title}\n{truncated body}` as used in notification bodies.
    #[must_use]
    pub fn message_body(&self) -> String {
        let mut body = String::new();
        if let Some(emoji) = &self.emoji {
            body.push_str(emoji);
            body.push(' ');
        }
        match &self.title {
            Some(title) => {
                body.push_str(title.trim());
                body.push('\n');
                body.push_str(&self.truncated_body_text());
            }
            None => body.push_str(&self.truncated_body_text()),
        }
        body
    }
}

fn join_snippet(title: Option<String>, body: String) -> String {
    match title {
        Some(title) => format!("{title}\n{body}"),
        None => body,
    }
}

// =============================================================================
// FRIEND ACTIVITY
// =============================================================================

/// A friend opened a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostView {
    pub id: PostViewId,
    pub post_id: PostId,
    pub friend_id: FriendId,
    pub created_at: DateTime<Utc>,
}

impl_record!(PostView, PostViewId, "post_views", "post view");

/// A friend replied to a post (by text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostReplyReceipt {
    pub id: PostReplyReceiptId,
    pub post_id: PostId,
    pub friend_id: FriendId,
    pub created_at: DateTime<Utc>,
}

impl_record!(PostReplyReceipt, PostReplyReceiptId, "post_reply_receipts", "reply receipt");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostReaction {
    pub id: PostReactionId,
    pub post_id: PostId,
    pub friend_id: FriendId,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

impl_record!(PostReaction, PostReactionId, "post_reactions", "reaction");

/// A point on a post card, as fractions of its width and height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    fn within_card(self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }
}

/// An emoji a friend stuck onto a post card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostSticker {
    pub id: PostStickerId,
    pub post_id: PostId,
    pub friend_id: FriendId,
    pub emoji: String,
    pub relative_position: Position,
    pub created_at: DateTime<Utc>,
}

impl_record!(PostSticker, PostStickerId, "post_stickers", "sticker");

impl PostSticker {
    #[must_use]
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if !is_emoji(&self.emoji) {
            errors.add("emoji", "is not an emoji");
        }
        if !self.relative_position.within_card() {
            errors.add("relative_position", "must be between 0 and 1");
        }
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostShare {
    pub id: PostShareId,
    pub post_id: PostId,
    pub sharer: Notifiable,
    pub created_at: DateTime<Utc>,
}

impl_record!(PostShare, PostShareId, "post_shares", "share");

// =============================================================================
// TEXT BLAST
// =============================================================================

/// SMS copy of a post for a friend without push notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlast {
    pub id: TextBlastId,
    pub post_id: PostId,
    pub friend_id: FriendId,
    /// Copied from the friend when the blast is created.
    pub phone_number: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl_record!(TextBlast, TextBlastId, "text_blasts", "text blast");

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
    }

    fn post(post_type: PostType) -> Post {
        Post {
            id: PostId::new(),
            author_id: UserId::new(),
            post_type,
            visibility: Visibility::Friends,
            title: None,
            body_html: "<p>went to the beach</p>".to_owned(),
            emoji: None,
            hidden_from_ids: Vec::new(),
            visible_to_ids: Vec::new(),
            pinned_until: None,
            quoted_post_id: None,
            encouragement_id: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn titles_only_for_titled_types() {
        let mut question = post(PostType::Question);
        question.title = Some("hm".to_owned());
        assert_eq!(question.validate(None).get("title"), ["must be blank"]);

        let mut poem = post(PostType::Poem);
        poem.title = Some("ode".to_owned());
        assert!(poem.validate(None).is_empty());
    }

    #[test]
    fn follow_ups_must_quote_a_post() {
        let follow_up = post(PostType::FollowUp);
        assert!(follow_up.validate(None).has("quoted_post"));

        let mut journal = post(PostType::JournalEntry);
        journal.quoted_post_id = Some(PostId::new());
        assert!(journal.validate(None).has("quoted_post"));
    }

    #[test]
    fn quoted_post_may_not_quote() {
        let original = post(PostType::JournalEntry);
        let mut first = post(PostType::FollowUp);
        first.quoted_post_id = Some(original.id);
        let mut second = post(PostType::FollowUp);
        second.quoted_post_id = Some(first.id);
        assert!(second.validate(Some(&first)).has("quoted_post"));
        assert!(first.validate(Some(&original)).is_empty());
    }

    #[test]
    fn blank_body_is_rejected() {
        let mut empty = post(PostType::Question);
        empty.body_html = "<p></p>".to_owned();
        assert!(empty.validate(None).has("body_html"));
    }

    #[test]
    fn snippets() {
        let mut entry = post(PostType::JournalEntry);
        entry.emoji = Some("🌊".to_owned());
        entry.title = Some("  beach day ".to_owned());
        entry.normalize();
        assert_eq!(entry.fun_title().as_deref(), Some("🌊 beach day"));
        assert_eq!(entry.snippet(), "> 🌊 beach day\n> went to the beach");
        assert_eq!(entry.reply_snippet(), "> 🌊 beach day\n> went to the beach\n\n");
        assert_eq!(entry.message_body(), "🌊 beach day\nwent to the beach");
    }

    #[test]
    fn user_created_requires_a_second_after_signup() {
        let mut welcome = post(PostType::JournalEntry);
        assert!(!welcome.user_created(now()));
        welcome.updated_at = now() + chrono::Duration::seconds(2);
        assert!(welcome.user_created(now()));
    }
}
