//! # Posts
//!
//! Writing posts, fanning out their notifications, and the friend activity
//! recorded against them.
//!
//! Fan-out rules (run after every save, never duplicating):
//! - nothing for posts written with the world (not user-created)
//! - nothing for `only_me` posts
//! - each selected friend who is subscribed to the post type (the quoted
//!   post's type for follow-ups), may view the post and has a device gets
//!   one delayed notification
//! - selected text-only friends get one text blast instead
//! - public posts also notify anonymous universe subscribers and every
//!   public-post subscriber user

use super::{Context, Cursor, Effect, Outcome, Page, notify, paginate};
use crate::error::{Error, Result, ValidationErrors};
use crate::ids::{
    EncouragementId, FriendId, PostId, PostReactionId, PostReplyReceiptId, PostShareId, PostStickerId,
    PostViewId, TextBlastId,
};
use crate::model::{
    Encouragement, Friend, Noticeable, Notifiable, Notification, Position, Post, PostReaction,
    PostReplyReceipt, PostShare, PostSticker, PostType, PostView, TextBlast, User, Visibility,
};
use crate::policy::{PostPolicy, Rule, Viewer, friend_can_view};
use crate::storage::StoreExt;
use crate::text;
use crate::validate::is_emoji;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Posts per page in world listings.
pub const DEFAULT_PAGE_SIZE: usize = 10;

// =============================================================================
// PARAMETERS
// =============================================================================

/// Fields of a new post.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPost {
    #[serde(rename = "type")]
    pub post_type: PostType,
    pub visibility: Visibility,
    #[serde(default)]
    pub title: Option<String>,
    /// Rich body. Takes precedence over `body_text`.
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub body_text: Option<String>,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub hidden_from_ids: Vec<FriendId>,
    #[serde(default)]
    pub visible_to_ids: Vec<FriendId>,
    #[serde(default)]
    pub pinned_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub quoted_post_id: Option<PostId>,
    #[serde(default)]
    pub encouragement_id: Option<EncouragementId>,
    /// Friends the author chose to notify.
    #[serde(default)]
    pub friend_ids_to_notify: Option<Vec<FriendId>>,
}

/// A sticker a friend is placing.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSticker {
    #[serde(default)]
    pub id: Option<PostStickerId>,
    pub emoji: String,
    pub relative_position: Position,
}

/// Editable fields of an existing post. Type and quoted post are fixed.
#[derive(Debug, Clone, Deserialize)]
pub struct PostUpdate {
    pub visibility: Visibility,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub body_text: Option<String>,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub hidden_from_ids: Vec<FriendId>,
    #[serde(default)]
    pub visible_to_ids: Vec<FriendId>,
    #[serde(default)]
    pub pinned_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub friend_ids_to_notify: Option<Vec<FriendId>>,
}

fn body_html(html: Option<&str>, text_body: Option<&str>) -> String {
    match (html, text_body) {
        (Some(html), _) => html.to_owned(),
        (None, Some(text_body)) => text::text_to_html(text_body),
        (None, None) => String::new(),
    }
}

// =============================================================================
// WRITING
// =============================================================================

/// Create a post and fan out its notifications.
pub fn create_post(
    ctx: &Context<'_>,
    author: &User,
    params: &NewPost,
    now: DateTime<Utc>,
) -> Result<Outcome<Post>> {
    let mut post = Post {
        id: PostId::new(),
        author_id: author.id,
        post_type: params.post_type,
        visibility: params.visibility,
        title: params.title.clone(),
        body_html: body_html(params.body_html.as_deref(), params.body_text.as_deref()),
        emoji: params.emoji.clone(),
        hidden_from_ids: params.hidden_from_ids.clone(),
        visible_to_ids: params.visible_to_ids.clone(),
        pinned_until: params.pinned_until,
        quoted_post_id: params.quoted_post_id,
        encouragement_id: params.encouragement_id,
        created_at: now,
        updated_at: now,
    };
    post.normalize();
    validate(ctx, &post, author)?;
    ctx.store.put(&post)?;
    let effects = create_notifications(ctx, &post, author, params.friend_ids_to_notify.as_deref(), now)?;
    Ok(Outcome::new(post, effects))
}

/// Update a post the user manages.
pub fn update_post(
    ctx: &Context<'_>,
    user: &User,
    post_id: PostId,
    params: &PostUpdate,
    now: DateTime<Utc>,
) -> Result<Outcome<Post>> {
    let mut post: Post = ctx.store.fetch(post_id)?;
    let author: User = ctx.store.fetch(post.author_id)?;
    PostPolicy::with_admin(Viewer::User(user), ctx.is_admin(user)).authorize(Rule::Manage, &post, &author)?;

    post.visibility = params.visibility;
    post.title = params.title.clone();
    post.body_html = body_html(params.body_html.as_deref(), params.body_text.as_deref());
    post.emoji = params.emoji.clone();
    post.hidden_from_ids = params.hidden_from_ids.clone();
    post.visible_to_ids = params.visible_to_ids.clone();
    post.pinned_until = params.pinned_until;
    post.updated_at = now;
    post.normalize();
    validate(ctx, &post, &author)?;
    ctx.store.put(&post)?;
    let effects = create_notifications(ctx, &post, &author, params.friend_ids_to_notify.as_deref(), now)?;
    Ok(Outcome::new(post, effects))
}

/// Delete a post and everything recorded against it.
pub fn delete_post(ctx: &Context<'_>, user: &User, post_id: PostId) -> Result<()> {
    let post: Post = ctx.store.fetch(post_id)?;
    let author: User = ctx.store.fetch(post.author_id)?;
    PostPolicy::with_admin(Viewer::User(user), ctx.is_admin(user)).authorize(Rule::Manage, &post, &author)?;
    if ctx.store.find::<Post>(|p| p.quoted_post_id == Some(post_id))?.is_some() {
        let mut errors = ValidationErrors::new();
        errors.add("base", "is quoted by a follow-up");
        return Err(errors.into());
    }

    for view in ctx.store.filter::<PostView>(|v| v.post_id == post_id)? {
        ctx.store.delete::<PostView>(view.id)?;
    }
    for receipt in ctx.store.filter::<PostReplyReceipt>(|r| r.post_id == post_id)? {
        ctx.store.delete::<PostReplyReceipt>(receipt.id)?;
    }
    for reaction in ctx.store.filter::<PostReaction>(|r| r.post_id == post_id)? {
        ctx.store.delete::<PostReaction>(reaction.id)?;
    }
    for sticker in ctx.store.filter::<PostSticker>(|s| s.post_id == post_id)? {
        ctx.store.delete::<PostSticker>(sticker.id)?;
    }
    for share in ctx.store.filter::<PostShare>(|s| s.post_id == post_id)? {
        ctx.store.delete::<PostShare>(share.id)?;
    }
    for blast in ctx.store.filter::<TextBlast>(|b| b.post_id == post_id)? {
        ctx.store.delete::<TextBlast>(blast.id)?;
    }
    for notification in
        ctx.store.filter::<Notification>(|n| n.noticeable == Noticeable::Post(post_id))?
    {
        ctx.store.delete::<Notification>(notification.id)?;
    }
    ctx.store.delete::<Post>(post_id)?;
    Ok(())
}

fn validate(ctx: &Context<'_>, post: &Post, author: &User) -> Result<()> {
    let quoted = match post.quoted_post_id {
        Some(id) => ctx.store.get::<Post>(id)?,
        None => None,
    };
    let mut errors = post.validate(quoted.as_ref());
    if post.quoted_post_id.is_some() {
        match &quoted {
            None => errors.add("quoted_post", "must exist"),
            Some(quoted) if quoted.author_id != author.id => {
                errors.add("quoted_post", "must be one of your posts");
            }
            Some(_) => {}
        }
    }

    let friend_ids: BTreeSet<FriendId> = ctx
        .store
        .filter::<Friend>(|f| f.user_id == author.id)?
        .into_iter()
        .map(|f| f.id)
        .collect();
    if post.hidden_from_ids.iter().any(|id| !friend_ids.contains(id)) {
        errors.add("hidden_from_ids", "must only contain your friends");
    }
    if post.visible_to_ids.iter().any(|id| !friend_ids.contains(id)) {
        errors.add("visible_to_ids", "must only contain your friends");
    }
    if let Some(encouragement_id) = post.encouragement_id {
        let belongs = ctx
            .store
            .get::<Encouragement>(encouragement_id)?
            .is_some_and(|e| friend_ids.contains(&e.friend_id));
        if !belongs {
            errors.add("encouragement", "must exist");
        }
    }
    errors.into_result()
}

// =============================================================================
// NOTIFICATION FAN-OUT
// =============================================================================

/// Create the notifications and text blasts a saved post calls for.
pub fn create_notifications(
    ctx: &Context<'_>,
    post: &Post,
    author: &User,
    friend_ids_to_notify: Option<&[FriendId]>,
    now: DateTime<Utc>,
) -> Result<Vec<Effect>> {
    let mut effects = Vec::new();
    let has_selected_friends = friend_ids_to_notify.is_some_and(|ids| !ids.is_empty());
    let send = post.user_created(author.created_at)
        && (has_selected_friends || post.visibility == Visibility::Public);
    if !send || post.visibility == Visibility::OnlyMe {
        return Ok(effects);
    }
    let delay = ctx.settings.notification_delay;

    let subscribed_type = match post.quoted_post_id {
        Some(id) => ctx
            .store
            .get::<Post>(id)?
            .map_or(post.post_type, |quoted| quoted.post_type),
        None => post.post_type,
    };
    let selected = friend_ids_to_notify.unwrap_or_default();
    let friends = ctx.store.filter::<Friend>(|f| {
        f.user_id == author.id
            && selected.contains(&f.id)
            && f.subscribed_to(subscribed_type)
            && (post.visibility != Visibility::ChosenFamily || f.chosen_family)
            && friend_can_view(post, f)
    })?;

    let existing = ctx
        .store
        .filter::<Notification>(|n| n.noticeable == Noticeable::Post(post.id))?;
    let notified: BTreeSet<Option<Notifiable>> = existing.iter().map(|n| n.recipient).collect();
    let blasted: BTreeSet<FriendId> = ctx
        .store
        .filter::<TextBlast>(|b| b.post_id == post.id)?
        .into_iter()
        .map(|b| b.friend_id)
        .collect();

    for friend in &friends {
        let recipient = Notifiable::Friend(friend.id);
        if ctx.notifiable(recipient)? {
            if !notified.contains(&Some(recipient)) {
                notify(ctx, Noticeable::Post(post.id), Some(recipient), delay, now, &mut effects)?;
            }
        } else if let Some(phone_number) = &friend.phone_number
            && !blasted.contains(&friend.id)
        {
            let blast = TextBlast {
                id: TextBlastId::new(),
                post_id: post.id,
                friend_id: friend.id,
                phone_number: phone_number.clone(),
                sent_at: None,
                created_at: now,
            };
            ctx.store.put(&blast)?;
            effects.push(Effect::SendTextBlast { id: blast.id, delay });
        }
    }

    if post.visibility == Visibility::Public {
        if !notified.contains(&None) {
            notify(ctx, Noticeable::Post(post.id), None, delay, now, &mut effects)?;
        }
        for user in ctx.public_post_subscribers()? {
            let recipient = Some(Notifiable::User(user.id));
            if !notified.contains(&recipient) {
                notify(ctx, Noticeable::Post(post.id), recipient, delay, now, &mut effects)?;
            }
        }
    }
    Ok(effects)
}

/// Re-push undelivered notifications to friends who have not opened the
/// post. Returns how many were queued.
pub fn push_missing_notifications(ctx: &Context<'_>, post_id: PostId) -> Result<Outcome<usize>> {
    ctx.store.fetch::<Post>(post_id)?;
    let viewers: BTreeSet<FriendId> = ctx
        .store
        .filter::<PostView>(|v| v.post_id == post_id)?
        .into_iter()
        .map(|v| v.friend_id)
        .collect();
    let effects: Vec<Effect> = ctx
        .store
        .filter::<Notification>(|n| {
            n.noticeable == Noticeable::Post(post_id)
                && !n.delivered()
                && n.recipient
                    .and_then(Notifiable::as_friend)
                    .is_some_and(|friend_id| !viewers.contains(&friend_id))
        })?
        .into_iter()
        .map(|n| Effect::PushNotification {
            id: n.id,
            delay: Duration::ZERO,
        })
        .collect();
    Ok(Outcome::new(effects.len(), effects))
}

// =============================================================================
// READING
// =============================================================================

/// Filters for world post listings.
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub post_type: Option<PostType>,
    /// Local date in the author's time zone.
    pub date: Option<NaiveDate>,
    /// Case-insensitive match on emoji, title and body.
    pub query: Option<String>,
    pub cursor: Option<Cursor>,
    pub limit: Option<usize>,
}

impl PostFilter {
    fn matches(&self, post: &Post, author: &User) -> bool {
        if self.post_type.is_some_and(|t| t != post.post_type) {
            return false;
        }
        if let Some(date) = self.date
            && post.created_at.with_timezone(&author.time_zone()).date_naive() != date
        {
            return false;
        }
        if let Some(query) = self.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let query = query.to_lowercase();
            let haystack = format!(
                "{} {} {}",
                post.emoji.as_deref().unwrap_or_default(),
                post.title.as_deref().unwrap_or_default(),
                post.body_text()
            )
            .to_lowercase();
            if !haystack.contains(&query) {
                return false;
            }
        }
        true
    }
}

/// Posts of `author`'s world as `viewer` may see them, newest first.
pub fn list_posts(
    ctx: &Context<'_>,
    viewer: Viewer<'_>,
    author: &User,
    filter: &PostFilter,
) -> Result<Page<Post>> {
    let policy = PostPolicy::new(viewer);
    let posts = ctx.store.filter::<Post>(|p| {
        p.author_id == author.id && policy.in_scope(p) && filter.matches(p, author)
    })?;
    Ok(paginate(
        posts,
        |p| (p.created_at, p.id.as_uuid()),
        filter.cursor,
        filter.limit.unwrap_or(DEFAULT_PAGE_SIZE),
    ))
}

/// The author's currently pinned posts, newest first.
pub fn pinned_posts(
    ctx: &Context<'_>,
    viewer: Viewer<'_>,
    author: &User,
    now: DateTime<Utc>,
) -> Result<Vec<Post>> {
    let policy = PostPolicy::new(viewer);
    let mut posts = ctx
        .store
        .filter::<Post>(|p| p.author_id == author.id && p.pinned(now) && policy.in_scope(p))?;
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(posts)
}

/// Load a post the viewer may see.
pub fn show_post(ctx: &Context<'_>, viewer: Viewer<'_>, admin: bool, post_id: PostId) -> Result<Post> {
    let post: Post = ctx.store.fetch(post_id)?;
    let author: User = ctx.store.fetch(post.author_id)?;
    PostPolicy::with_admin(viewer, admin).authorize(Rule::Show, &post, &author)?;
    Ok(post)
}

/// Engagement counters for the author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PostStats {
    /// Friends whose notification was delivered.
    pub notified_friends: usize,
    pub viewers: usize,
    pub repliers: usize,
}

pub fn post_stats(ctx: &Context<'_>, user: &User, post_id: PostId) -> Result<PostStats> {
    let post = managed_post(ctx, user, post_id)?;
    let notified: BTreeSet<FriendId> = ctx
        .store
        .filter::<Notification>(|n| n.noticeable == Noticeable::Post(post.id) && n.delivered())?
        .into_iter()
        .filter_map(|n| n.recipient.and_then(Notifiable::as_friend))
        .collect();
    Ok(PostStats {
        notified_friends: notified.len(),
        viewers: viewer_ids(ctx, post.id)?.len(),
        repliers: replier_ids(ctx, post.id)?.len(),
    })
}

/// A friend and what they can see of a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudienceMember {
    pub friend_id: FriendId,
    pub name: String,
    pub emoji: Option<String>,
    pub chosen_family: bool,
    pub hidden: bool,
    pub can_view: bool,
}

/// Every friend of the author, with their access to the post.
pub fn audience(ctx: &Context<'_>, user: &User, post_id: PostId) -> Result<Vec<AudienceMember>> {
    let post = managed_post(ctx, user, post_id)?;
    let mut friends = ctx.store.filter::<Friend>(|f| f.user_id == post.author_id)?;
    friends.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(friends
        .into_iter()
        .map(|friend| AudienceMember {
            hidden: post.hidden_from_ids.contains(&friend.id),
            can_view: friend_can_view(&post, &friend),
            friend_id: friend.id,
            name: friend.name,
            emoji: friend.emoji,
            chosen_family: friend.chosen_family,
        })
        .collect())
}

/// Friends who opened the post, most recent first.
pub fn viewers(ctx: &Context<'_>, user: &User, post_id: PostId) -> Result<Vec<Friend>> {
    let post = managed_post(ctx, user, post_id)?;
    let mut views = ctx.store.filter::<PostView>(|v| v.post_id == post.id)?;
    views.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let mut seen = BTreeSet::new();
    let mut friends = Vec::new();
    for view in views {
        if seen.insert(view.friend_id)
            && let Some(friend) = ctx.store.get::<Friend>(view.friend_id)?
        {
            friends.push(friend);
        }
    }
    Ok(friends)
}

fn managed_post(ctx: &Context<'_>, user: &User, post_id: PostId) -> Result<Post> {
    let post: Post = ctx.store.fetch(post_id)?;
    let author: User = ctx.store.fetch(post.author_id)?;
    PostPolicy::with_admin(Viewer::User(user), ctx.is_admin(user)).authorize(Rule::Manage, &post, &author)?;
    Ok(post)
}

pub(crate) fn viewer_ids(ctx: &Context<'_>, post_id: PostId) -> Result<BTreeSet<FriendId>> {
    Ok(ctx
        .store
        .filter::<PostView>(|v| v.post_id == post_id)?
        .into_iter()
        .map(|v| v.friend_id)
        .collect())
}

pub(crate) fn replier_ids(ctx: &Context<'_>, post_id: PostId) -> Result<BTreeSet<FriendId>> {
    Ok(ctx
        .store
        .filter::<PostReplyReceipt>(|r| r.post_id == post_id)?
        .into_iter()
        .map(|r| r.friend_id)
        .collect())
}

// =============================================================================
// FRIEND ACTIVITY
// =============================================================================

fn friend_post(ctx: &Context<'_>, friend: &Friend, post_id: PostId, rule: Rule) -> Result<Post> {
    let post: Post = ctx.store.fetch(post_id)?;
    let author: User = ctx.store.fetch(post.author_id)?;
    PostPolicy::new(Viewer::Friend(friend)).authorize(rule, &post, &author)?;
    Ok(post)
}

/// Record that a friend opened a post. Returns whether this is the first view.
pub fn mark_seen(ctx: &Context<'_>, friend: &Friend, post_id: PostId, now: DateTime<Utc>) -> Result<bool> {
    let post = friend_post(ctx, friend, post_id, Rule::MarkSeen)?;
    if viewer_ids(ctx, post.id)?.contains(&friend.id) {
        return Ok(false);
    }
    ctx.store.put(&PostView {
        id: PostViewId::new(),
        post_id: post.id,
        friend_id: friend.id,
        created_at: now,
    })?;
    Ok(true)
}

/// Record that a friend replied to a post. Returns whether this is the first reply.
pub fn mark_replied(ctx: &Context<'_>, friend: &Friend, post_id: PostId, now: DateTime<Utc>) -> Result<bool> {
    let post = friend_post(ctx, friend, post_id, Rule::MarkReplied)?;
    if replier_ids(ctx, post.id)?.contains(&friend.id) {
        return Ok(false);
    }
    ctx.store.put(&PostReplyReceipt {
        id: PostReplyReceiptId::new(),
        post_id: post.id,
        friend_id: friend.id,
        created_at: now,
    })?;
    Ok(true)
}

/// React to a post with an emoji. Repeating a reaction returns the existing one.
pub fn react(
    ctx: &Context<'_>,
    friend: &Friend,
    post_id: PostId,
    emoji: &str,
    now: DateTime<Utc>,
) -> Result<PostReaction> {
    let post = friend_post(ctx, friend, post_id, Rule::Show)?;
    let emoji = emoji.trim();
    if !is_emoji(emoji) {
        let mut errors = ValidationErrors::new();
        errors.add("emoji", "is not an emoji");
        return Err(errors.into());
    }
    if let Some(existing) = ctx.store.find::<PostReaction>(|r| {
        r.post_id == post.id && r.friend_id == friend.id && r.emoji == emoji
    })? {
        return Ok(existing);
    }
    let reaction = PostReaction {
        id: PostReactionId::new(),
        post_id: post.id,
        friend_id: friend.id,
        emoji: emoji.to_owned(),
        created_at: now,
    };
    ctx.store.put(&reaction)?;
    Ok(reaction)
}

/// Reactions on a post, oldest first.
pub fn reactions(ctx: &Context<'_>, post_id: PostId) -> Result<Vec<PostReaction>> {
    let mut reactions = ctx.store.filter::<PostReaction>(|r| r.post_id == post_id)?;
    reactions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(reactions)
}

/// Stick an emoji onto a post the friend can see. A client-chosen id is
/// kept so optimistic UIs can refer to the sticker before the reply.
pub fn add_sticker(
    ctx: &Context<'_>,
    friend: &Friend,
    post_id: PostId,
    new: &NewSticker,
    now: DateTime<Utc>,
) -> Result<PostSticker> {
    let post = friend_post(ctx, friend, post_id, Rule::Show)?;
    let id = new.id.unwrap_or_else(PostStickerId::new);
    let mut errors = ValidationErrors::new();
    if ctx.store.get::<PostSticker>(id)?.is_some() {
        errors.add("id", "has already been taken");
    }
    let sticker = PostSticker {
        id,
        post_id: post.id,
        friend_id: friend.id,
        emoji: new.emoji.trim().to_owned(),
        relative_position: new.relative_position,
        created_at: now,
    };
    errors.merge(sticker.validate());
    errors.into_result()?;
    ctx.store.put(&sticker)?;
    Ok(sticker)
}

/// Stickers on a post, oldest first.
pub fn stickers(ctx: &Context<'_>, post_id: PostId) -> Result<Vec<PostSticker>> {
    let mut stickers = ctx.store.filter::<PostSticker>(|s| s.post_id == post_id)?;
    stickers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(stickers)
}

fn own_sticker(ctx: &Context<'_>, friend: &Friend, sticker_id: PostStickerId) -> Result<PostSticker> {
    let sticker: PostSticker = ctx.store.fetch(sticker_id)?;
    if sticker.friend_id != friend.id {
        return Err(Error::Forbidden);
    }
    Ok(sticker)
}

/// Drag one of the friend's own stickers somewhere else on the card.
pub fn move_sticker(
    ctx: &Context<'_>,
    friend: &Friend,
    sticker_id: PostStickerId,
    position: Position,
) -> Result<PostSticker> {
    let mut sticker = own_sticker(ctx, friend, sticker_id)?;
    sticker.relative_position = position;
    sticker.validate().into_result()?;
    ctx.store.put(&sticker)?;
    Ok(sticker)
}

/// Peel off one of the friend's own stickers, returning its post.
pub fn remove_sticker(ctx: &Context<'_>, friend: &Friend, sticker_id: PostStickerId) -> Result<PostId> {
    let sticker = own_sticker(ctx, friend, sticker_id)?;
    ctx.store.delete::<PostSticker>(sticker.id)?;
    Ok(sticker.post_id)
}

/// Record a share by a friend or the author.
pub fn share_post(
    ctx: &Context<'_>,
    viewer: Viewer<'_>,
    post_id: PostId,
    now: DateTime<Utc>,
) -> Result<PostShare> {
    let post: Post = ctx.store.fetch(post_id)?;
    let author: User = ctx.store.fetch(post.author_id)?;
    PostPolicy::new(viewer).authorize(Rule::Share, &post, &author)?;
    let sharer = match viewer {
        Viewer::Friend(friend) => Notifiable::Friend(friend.id),
        Viewer::User(user) => Notifiable::User(user.id),
        Viewer::Anonymous => return Err(Error::NotAuthenticated),
    };
    let share = PostShare {
        id: PostShareId::new(),
        post_id: post.id,
        sharer,
        created_at: now,
    };
    ctx.store.put(&share)?;
    Ok(share)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::{Harness, friend, register_device, t0, user};
    use chrono::Duration as ChronoDuration;

    fn later() -> DateTime<Utc> {
        t0() + ChronoDuration::days(1)
    }

    fn new_post(visibility: Visibility, notify: Option<Vec<FriendId>>) -> NewPost {
        NewPost {
            post_type: PostType::JournalEntry,
            visibility,
            title: Some("beach day".to_owned()),
            body_html: None,
            body_text: Some("went swimming".to_owned()),
            emoji: None,
            hidden_from_ids: Vec::new(),
            visible_to_ids: Vec::new(),
            pinned_until: None,
            quoted_post_id: None,
            encouragement_id: None,
            friend_ids_to_notify: notify,
        }
    }

    fn post_notifications(ctx: &Context<'_>, post_id: PostId) -> Vec<Notification> {
        ctx.store
            .filter::<Notification>(|n| n.noticeable == Noticeable::Post(post_id))
            .unwrap()
    }

    #[test]
    fn notifies_selected_friends_with_devices() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        let bob = friend(&ctx, &kai, "bob", None);
        let amy = friend(&ctx, &kai, "amy", None);
        register_device(&ctx, Notifiable::Friend(bob.id));
        register_device(&ctx, Notifiable::Friend(amy.id));

        let outcome = create_post(&ctx, &kai, &new_post(Visibility::Friends, Some(vec![bob.id])), later()).unwrap();
        let notifications = post_notifications(&ctx, outcome.value.id);
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].recipient, Some(Notifiable::Friend(bob.id)));
        assert_eq!(
            outcome.effects,
            vec![Effect::PushNotification {
                id: notifications[0].id,
                delay: Duration::from_secs(60)
            }]
        );
        assert_eq!(outcome.value.body_html, "<p>went swimming</p>");
    }

    #[test]
    fn text_only_friends_get_text_blasts() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        let texter = friend(&ctx, &kai, "tex", Some("+15555550111"));
        let silent = friend(&ctx, &kai, "silent", None);

        let outcome = create_post(
            &ctx,
            &kai,
            &new_post(Visibility::Friends, Some(vec![texter.id, silent.id])),
            later(),
        )
        .unwrap();
        let blasts = ctx.store.all::<TextBlast>().unwrap();
        assert_eq!(blasts.len(), 1);
        assert_eq!(blasts[0].friend_id, texter.id);
        assert_eq!(blasts[0].phone_number, "+15555550111");
        assert!(matches!(outcome.effects[..], [Effect::SendTextBlast { .. }]));
        assert!(post_notifications(&ctx, outcome.value.id).is_empty());
    }

    #[test]
    fn public_posts_notify_universe_and_subscribers() {
        let mut harness = Harness::new();
        harness.settings.public_post_subscriber_handles = vec!["sam-world".to_owned()];
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        let (sam, _) = user(&ctx, "sam", "+15555550101", "sam-world");

        let outcome = create_post(&ctx, &kai, &new_post(Visibility::Public, None), later()).unwrap();
        let recipients: BTreeSet<Option<Notifiable>> = post_notifications(&ctx, outcome.value.id)
            .into_iter()
            .map(|n| n.recipient)
            .collect();
        assert_eq!(
            recipients,
            BTreeSet::from([None, Some(Notifiable::User(sam.id))])
        );
    }

    #[test]
    fn updates_never_duplicate_notifications() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        let bob = friend(&ctx, &kai, "bob", None);
        let tex = friend(&ctx, &kai, "tex", Some("+15555550111"));
        register_device(&ctx, Notifiable::Friend(bob.id));

        let notify = Some(vec![bob.id, tex.id]);
        let post = create_post(&ctx, &kai, &new_post(Visibility::Public, notify.clone()), later())
            .unwrap()
            .value;
        let update = PostUpdate {
            visibility: Visibility::Public,
            title: Some("beach day!".to_owned()),
            body_html: None,
            body_text: Some("went swimming again".to_owned()),
            emoji: None,
            hidden_from_ids: Vec::new(),
            visible_to_ids: Vec::new(),
            pinned_until: None,
            friend_ids_to_notify: notify,
        };
        let outcome = update_post(&ctx, &kai, post.id, &update, later()).unwrap();
        assert!(outcome.effects.is_empty());
        assert_eq!(post_notifications(&ctx, post.id).len(), 2);
        assert_eq!(ctx.store.count::<TextBlast>().unwrap(), 1);
    }

    #[test]
    fn only_me_and_welcome_posts_stay_quiet() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        let bob = friend(&ctx, &kai, "bob", None);
        register_device(&ctx, Notifiable::Friend(bob.id));

        let private = create_post(&ctx, &kai, &new_post(Visibility::OnlyMe, Some(vec![bob.id])), later()).unwrap();
        assert!(private.effects.is_empty());

        // Written in the same second as the account: not user-created.
        let early = create_post(&ctx, &kai, &new_post(Visibility::Public, None), t0()).unwrap();
        assert!(early.effects.is_empty());
    }

    #[test]
    fn chosen_family_posts_skip_other_friends() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        let bob = friend(&ctx, &kai, "bob", None);
        let mut mom = friend(&ctx, &kai, "mom", None);
        mom.chosen_family = true;
        ctx.store.put(&mom).unwrap();
        register_device(&ctx, Notifiable::Friend(bob.id));
        register_device(&ctx, Notifiable::Friend(mom.id));

        let post = create_post(
            &ctx,
            &kai,
            &new_post(Visibility::ChosenFamily, Some(vec![bob.id, mom.id])),
            later(),
        )
        .unwrap()
        .value;
        let recipients: Vec<_> = post_notifications(&ctx, post.id).into_iter().map(|n| n.recipient).collect();
        assert_eq!(recipients, vec![Some(Notifiable::Friend(mom.id))]);
    }

    #[test]
    fn unsubscribed_and_hidden_friends_are_skipped() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        let mut poetry_hater = friend(&ctx, &kai, "bob", None);
        poetry_hater.subscribed_post_types = vec![PostType::JournalEntry];
        ctx.store.put(&poetry_hater).unwrap();
        let hidden = friend(&ctx, &kai, "amy", None);
        register_device(&ctx, Notifiable::Friend(poetry_hater.id));
        register_device(&ctx, Notifiable::Friend(hidden.id));

        let mut poem = new_post(Visibility::Friends, Some(vec![poetry_hater.id, hidden.id]));
        poem.post_type = PostType::Poem;
        poem.hidden_from_ids = vec![hidden.id];
        let post = create_post(&ctx, &kai, &poem, later()).unwrap().value;
        assert!(post_notifications(&ctx, post.id).is_empty());
    }

    #[test]
    fn follow_ups_use_the_quoted_post_type() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        let mut bob = friend(&ctx, &kai, "bob", None);
        bob.subscribed_post_types = vec![PostType::Question];
        ctx.store.put(&bob).unwrap();
        register_device(&ctx, Notifiable::Friend(bob.id));

        let mut question = new_post(Visibility::Friends, None);
        question.post_type = PostType::Question;
        question.title = None;
        let question = create_post(&ctx, &kai, &question, later()).unwrap().value;

        let mut follow_up = new_post(Visibility::Friends, Some(vec![bob.id]));
        follow_up.post_type = PostType::FollowUp;
        follow_up.title = None;
        follow_up.quoted_post_id = Some(question.id);
        let follow_up = create_post(&ctx, &kai, &follow_up, later()).unwrap().value;
        assert_eq!(post_notifications(&ctx, follow_up.id).len(), 1);
    }

    #[test]
    fn hidden_from_must_reference_friends() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        let mut params = new_post(Visibility::Friends, None);
        params.hidden_from_ids = vec![FriendId::new()];
        assert!(matches!(
            create_post(&ctx, &kai, &params, later()),
            Err(Error::Invalid(errors)) if errors.has("hidden_from_ids")
        ));
    }

    #[test]
    fn only_authors_manage_posts() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        let (sam, _) = user(&ctx, "sam", "+15555550101", "sam-world");
        let post = create_post(&ctx, &kai, &new_post(Visibility::Friends, None), later()).unwrap().value;
        assert!(matches!(delete_post(&ctx, &sam, post.id), Err(Error::Forbidden)));
        assert!(matches!(post_stats(&ctx, &sam, post.id), Err(Error::Forbidden)));
        delete_post(&ctx, &kai, post.id).unwrap();
        assert!(ctx.store.get::<Post>(post.id).unwrap().is_none());
    }

    #[test]
    fn friend_activity_and_stats() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        let bob = friend(&ctx, &kai, "bob", None);
        let amy = friend(&ctx, &kai, "amy", None);
        register_device(&ctx, Notifiable::Friend(bob.id));
        let post = create_post(&ctx, &kai, &new_post(Visibility::Friends, Some(vec![bob.id])), later())
            .unwrap()
            .value;

        assert!(mark_seen(&ctx, &bob, post.id, later()).unwrap());
        assert!(!mark_seen(&ctx, &bob, post.id, later()).unwrap());
        assert!(mark_seen(&ctx, &amy, post.id, later()).unwrap());
        assert!(mark_replied(&ctx, &amy, post.id, later()).unwrap());
        react(&ctx, &bob, post.id, "❤️", later()).unwrap();
        react(&ctx, &bob, post.id, "❤️", later()).unwrap();
        assert_eq!(reactions(&ctx, post.id).unwrap().len(), 1);
        assert!(react(&ctx, &bob, post.id, "lol", later()).is_err());

        let mut notification = post_notifications(&ctx, post.id).remove(0);
        notification.delivered_at = Some(later());
        ctx.store.put(&notification).unwrap();

        let stats = post_stats(&ctx, &kai, post.id).unwrap();
        assert_eq!(
            stats,
            PostStats {
                notified_friends: 1,
                viewers: 2,
                repliers: 1
            }
        );
        assert_eq!(viewers(&ctx, &kai, post.id).unwrap().len(), 2);
        let audience = audience(&ctx, &kai, post.id).unwrap();
        assert_eq!(audience.len(), 2);
        assert!(audience.iter().all(|m| m.can_view));
    }

    fn sticker(emoji: &str, x: f64, y: f64) -> NewSticker {
        NewSticker {
            id: None,
            emoji: emoji.to_owned(),
            relative_position: Position { x, y },
        }
    }

    #[test]
    fn stickers_belong_to_the_friend_who_placed_them() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        let bob = friend(&ctx, &kai, "bob", None);
        let amy = friend(&ctx, &kai, "amy", None);
        let post = create_post(&ctx, &kai, &new_post(Visibility::Friends, None), later()).unwrap().value;

        let placed = add_sticker(&ctx, &bob, post.id, &sticker("🌹", 0.25, 0.5), later()).unwrap();
        add_sticker(&ctx, &amy, post.id, &sticker("🐸", 1.0, 0.0), later()).unwrap();
        assert_eq!(stickers(&ctx, post.id).unwrap().len(), 2);

        let moved = move_sticker(&ctx, &bob, placed.id, Position { x: 0.9, y: 0.1 }).unwrap();
        assert_eq!(moved.relative_position, Position { x: 0.9, y: 0.1 });
        assert!(matches!(
            move_sticker(&ctx, &amy, placed.id, Position { x: 0.5, y: 0.5 }),
            Err(Error::Forbidden)
        ));
        assert!(matches!(remove_sticker(&ctx, &amy, placed.id), Err(Error::Forbidden)));
        assert_eq!(remove_sticker(&ctx, &bob, placed.id).unwrap(), post.id);
        assert_eq!(stickers(&ctx, post.id).unwrap().len(), 1);

        delete_post(&ctx, &kai, post.id).unwrap();
        assert!(ctx.store.all::<PostSticker>().unwrap().is_empty());
    }

    #[test]
    fn stickers_stay_on_the_card() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        let bob = friend(&ctx, &kai, "bob", None);
        let post = create_post(&ctx, &kai, &new_post(Visibility::Friends, None), later()).unwrap().value;

        assert!(matches!(
            add_sticker(&ctx, &bob, post.id, &sticker("🌹", 1.5, 0.5), later()),
            Err(Error::Invalid(_))
        ));
        assert!(matches!(
            add_sticker(&ctx, &bob, post.id, &sticker("→", 0.5, 0.5), later()),
            Err(Error::Invalid(_))
        ));
        let placed = add_sticker(&ctx, &bob, post.id, &sticker("🌹", 0.5, 0.5), later()).unwrap();
        let again = NewSticker { id: Some(placed.id), ..sticker("🌹", 0.1, 0.1) };
        assert!(matches!(
            add_sticker(&ctx, &bob, post.id, &again, later()),
            Err(Error::Invalid(_))
        ));
        assert!(matches!(
            move_sticker(&ctx, &bob, placed.id, Position { x: -0.1, y: 0.0 }),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn only_visible_posts_take_stickers() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        let bob = friend(&ctx, &kai, "bob", None);
        let post = create_post(&ctx, &kai, &new_post(Visibility::OnlyMe, None), later()).unwrap().value;
        assert!(matches!(
            add_sticker(&ctx, &bob, post.id, &sticker("🌹", 0.5, 0.5), later()),
            Err(Error::Forbidden)
        ));
    }

    #[test]
    fn push_missing_skips_viewers_and_delivered() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        let bob = friend(&ctx, &kai, "bob", None);
        let amy = friend(&ctx, &kai, "amy", None);
        register_device(&ctx, Notifiable::Friend(bob.id));
        register_device(&ctx, Notifiable::Friend(amy.id));
        let post = create_post(
            &ctx,
            &kai,
            &new_post(Visibility::Friends, Some(vec![bob.id, amy.id])),
            later(),
        )
        .unwrap()
        .value;
        mark_seen(&ctx, &bob, post.id, later()).unwrap();
        let outcome = push_missing_notifications(&ctx, post.id).unwrap();
        assert_eq!(outcome.value, 1);
    }

    #[test]
    fn listings_follow_the_policy() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        let bob = friend(&ctx, &kai, "bob", None);
        create_post(&ctx, &kai, &new_post(Visibility::Friends, None), later()).unwrap();
        create_post(&ctx, &kai, &new_post(Visibility::OnlyMe, None), later()).unwrap();
        let mut pinned = new_post(Visibility::ChosenFamily, None);
        pinned.pinned_until = Some(later() + ChronoDuration::days(3));
        create_post(&ctx, &kai, &pinned, later()).unwrap();

        let filter = PostFilter::default();
        let as_friend = list_posts(&ctx, Viewer::Friend(&bob), &kai, &filter).unwrap();
        // welcome post + friends post
        assert_eq!(as_friend.items.len(), 2);
        let as_owner = list_posts(&ctx, Viewer::User(&kai), &kai, &filter).unwrap();
        assert_eq!(as_owner.items.len(), 4);
        let as_public = list_posts(&ctx, Viewer::Anonymous, &kai, &filter).unwrap();
        assert_eq!(as_public.items.len(), 1);

        let search = PostFilter {
            query: Some("SWIMMING".to_owned()),
            ..PostFilter::default()
        };
        assert_eq!(list_posts(&ctx, Viewer::User(&kai), &kai, &search).unwrap().items.len(), 3);

        assert_eq!(pinned_posts(&ctx, Viewer::User(&kai), &kai, later()).unwrap().len(), 1);
        assert!(pinned_posts(&ctx, Viewer::Friend(&bob), &kai, later()).unwrap().is_empty());
    }

    #[test]
    fn sharing() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        let bob = friend(&ctx, &kai, "bob", None);
        let post = create_post(&ctx, &kai, &new_post(Visibility::Friends, None), later()).unwrap().value;
        let share = share_post(&ctx, Viewer::Friend(&bob), post.id, later()).unwrap();
        assert_eq!(share.sharer, Notifiable::Friend(bob.id));
        assert!(matches!(
            share_post(&ctx, Viewer::Anonymous, post.id, later()),
            Err(Error::Forbidden)
        ));
    }
}
