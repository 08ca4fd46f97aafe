//! # Universe
//!
//! Feeds that cross world boundaries: a user's local universe (their own
//! posts, worlds they belong to as a friend, and public posts) and the
//! directory of worlds.
//!
//! A user belongs to another world as a friend when that world has a friend
//! with the user's phone number. The anonymous directory instead matches
//! devices: a friend registration on the same device id, or on the same
//! fingerprint with enough confidence.

use super::posts::{replier_ids, viewer_ids};
use super::{Context, Cursor, Page, paginate};
use crate::error::Result;
use crate::ids::{FriendId, UserId};
use crate::model::{Friend, Notifiable, Post, PushRegistration, User, Visibility, World};
use crate::policy::friend_can_view;
use crate::storage::StoreExt;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Posts per page in the local universe.
pub const FEED_PAGE_SIZE: usize = 5;

/// Fingerprint matches below this confidence are ignored.
pub const MIN_FINGERPRINT_CONFIDENCE: f64 = 0.3;

/// How the viewer relates to a feed post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "relation", rename_all = "snake_case")]
pub enum FeedRelation {
    /// The viewer wrote it.
    Author,
    /// The viewer is a friend in the author's world.
    Friend {
        friend_id: FriendId,
        friend_access_token: String,
        reply_to_number: String,
        seen: bool,
        replied: bool,
        repliers: usize,
    },
    /// A public post from a stranger.
    Public,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedPost {
    pub post: Post,
    pub author_name: String,
    pub world_handle: String,
    #[serde(flatten)]
    pub relation: FeedRelation,
}

/// Friends in other worlds that share the user's phone number.
pub fn associated_friends(ctx: &Context<'_>, user: &User) -> Result<Vec<Friend>> {
    ctx.store
        .filter::<Friend>(|f| f.user_id != user.id && f.phone_number.as_deref() == Some(&user.phone_number))
}

/// One page of the user's local universe, newest first.
pub fn local_universe(
    ctx: &Context<'_>,
    user: &User,
    cursor: Option<Cursor>,
    limit: Option<usize>,
) -> Result<Page<FeedPost>> {
    let friends_by_author: BTreeMap<UserId, Friend> = associated_friends(ctx, user)?
        .into_iter()
        .map(|f| (f.user_id, f))
        .collect();
    let authors: BTreeMap<UserId, User> = ctx
        .store
        .all::<User>()?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();

    let posts = ctx.store.filter::<Post>(|post| {
        if post.author_id == user.id {
            return post.visibility != Visibility::OnlyMe;
        }
        let public = post.visibility == Visibility::Public
            && authors
                .get(&post.author_id)
                .is_some_and(|author| post.user_created(author.created_at));
        public
            || friends_by_author
                .get(&post.author_id)
                .is_some_and(|friend| friend_can_view(post, friend))
    })?;
    let page = paginate(
        posts,
        |p| (p.created_at, p.id.as_uuid()),
        cursor,
        limit.unwrap_or(FEED_PAGE_SIZE),
    );

    let mut items = Vec::with_capacity(page.items.len());
    for post in page.items {
        let Some(author) = authors.get(&post.author_id) else {
            continue;
        };
        let world = ctx.world_of(author.id)?;
        let relation = if author.id == user.id {
            FeedRelation::Author
        } else if let Some(friend) = friends_by_author.get(&author.id) {
            let repliers = replier_ids(ctx, post.id)?;
            FeedRelation::Friend {
                friend_id: friend.id,
                friend_access_token: friend.access_token.clone(),
                reply_to_number: world.reply_to_number(author).to_owned(),
                seen: viewer_ids(ctx, post.id)?.contains(&friend.id),
                replied: repliers.contains(&friend.id),
                repliers: repliers.len(),
            }
        } else {
            FeedRelation::Public
        };
        items.push(FeedPost {
            author_name: author.name.clone(),
            world_handle: world.handle,
            relation,
            post,
        });
    }
    Ok(Page {
        items,
        next_cursor: page.next_cursor,
    })
}

// =============================================================================
// WORLD DIRECTORY
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniverseWorld {
    pub world: World,
    pub owner_name: String,
    pub post_count: usize,
    pub last_post_created_at: Option<DateTime<Utc>>,
    /// Access token of the viewer's friend in this world, if any.
    pub associated_friend_access_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct UniverseWorlds {
    pub joined_worlds: Vec<UniverseWorld>,
    pub other_worlds: Vec<UniverseWorld>,
}

/// Friends registered on the same devices as the user.
fn device_friends(ctx: &Context<'_>, user: &User) -> Result<BTreeMap<UserId, Friend>> {
    let own = ctx.registrations_of(Some(Notifiable::User(user.id)))?;
    let device_ids: BTreeSet<&str> = own.iter().filter_map(|r| r.device_id.as_deref()).collect();
    let fingerprints: BTreeSet<&str> = own
        .iter()
        .filter_map(|r| r.device_fingerprint.as_deref())
        .collect();
    let same_device = |r: &PushRegistration| {
        r.device_id.as_deref().is_some_and(|id| device_ids.contains(id))
            || (r
                .device_fingerprint
                .as_deref()
                .is_some_and(|fp| fingerprints.contains(fp))
                && r
                    .device_fingerprint_confidence
                    .is_some_and(|c| c >= MIN_FINGERPRINT_CONFIDENCE))
    };
    let friend_ids: BTreeSet<FriendId> = ctx
        .store
        .filter::<PushRegistration>(|r| matches!(r.owner, Some(Notifiable::Friend(_))) && same_device(r))?
        .into_iter()
        .filter_map(|r| r.owner.and_then(Notifiable::as_friend))
        .collect();
    let mut friends = BTreeMap::new();
    for friend_id in friend_ids {
        if let Some(friend) = ctx.store.get::<Friend>(friend_id)? {
            friends.insert(friend.user_id, friend);
        }
    }
    Ok(friends)
}

/// Worlds whose owners have installed the app, most recently active first,
/// split into those the viewer belongs to and the rest.
pub fn universe_worlds(ctx: &Context<'_>, viewer: Option<&User>) -> Result<UniverseWorlds> {
    let friends_by_owner = match viewer {
        Some(user) => device_friends(ctx, user)?,
        None => BTreeMap::new(),
    };

    let mut stats: BTreeMap<UserId, (usize, Option<DateTime<Utc>>)> = BTreeMap::new();
    for post in ctx.store.all::<Post>()? {
        let entry = stats.entry(post.author_id).or_insert((0, None));
        entry.0 += 1;
        entry.1 = entry.1.max(Some(post.created_at));
    }

    let mut worlds = Vec::new();
    for world in ctx.store.all::<World>()? {
        if !ctx.notifiable(Notifiable::User(world.owner_id))? {
            continue;
        }
        let Some(owner) = ctx.store.get::<User>(world.owner_id)? else {
            continue;
        };
        let (post_count, last_post_created_at) = stats.get(&owner.id).copied().unwrap_or_default();
        worlds.push(UniverseWorld {
            associated_friend_access_token: friends_by_owner
                .get(&owner.id)
                .map(|f| f.access_token.clone()),
            owner_name: owner.name,
            world,
            post_count,
            last_post_created_at,
        });
    }
    // Most recent first, worlds without posts last.
    worlds.sort_by(|a, b| b.last_post_created_at.cmp(&a.last_post_created_at));

    let mut result = UniverseWorlds::default();
    for world in worlds {
        let own = viewer.is_some_and(|user| user.id == world.world.owner_id);
        if own || world.associated_friend_access_token.is_some() {
            result.joined_worlds.push(world);
        } else {
            result.other_worlds.push(world);
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PostType;
    use crate::service::posts::{NewPost, create_post, mark_replied, mark_seen};
    use crate::service::push::{SubscriptionParams, register_subscription};
    use crate::service::testing::{Harness, friend, register_device, t0, user};
    use chrono::Duration;

    fn post(ctx: &Context<'_>, author: &User, visibility: Visibility, hidden: Vec<FriendId>, minutes: i64) -> Post {
        create_post(
            ctx,
            author,
            &NewPost {
                post_type: PostType::JournalEntry,
                visibility,
                title: None,
                body_html: None,
                body_text: Some(format!("{visibility} post")),
                emoji: None,
                hidden_from_ids: hidden,
                visible_to_ids: Vec::new(),
                pinned_until: None,
                quoted_post_id: None,
                encouragement_id: None,
                friend_ids_to_notify: None,
            },
            t0() + Duration::days(1) + Duration::minutes(minutes),
        )
        .unwrap()
        .value
    }

    #[test]
    fn local_universe_mixes_own_friend_and_public_posts() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        let (sam, _) = user(&ctx, "sam", "+15555550101", "sam-world");
        let (zed, _) = user(&ctx, "zed", "+15555550102", "zed-world");
        // kai is a friend in sam's world.
        let kai_at_sam = friend(&ctx, &sam, "kai", Some("+15555550100"));
        let other = friend(&ctx, &sam, "other", None);

        let own = post(&ctx, &kai, Visibility::Friends, Vec::new(), 1);
        post(&ctx, &kai, Visibility::OnlyMe, Vec::new(), 2);
        let sams = post(&ctx, &sam, Visibility::Friends, Vec::new(), 3);
        post(&ctx, &sam, Visibility::Friends, vec![kai_at_sam.id], 4);
        post(&ctx, &sam, Visibility::ChosenFamily, Vec::new(), 5);
        let public = post(&ctx, &zed, Visibility::Public, Vec::new(), 6);
        post(&ctx, &zed, Visibility::Friends, Vec::new(), 7);

        mark_seen(&ctx, &kai_at_sam, sams.id, t0() + Duration::days(2)).unwrap();
        mark_replied(&ctx, &other, sams.id, t0() + Duration::days(2)).unwrap();

        let page = local_universe(&ctx, &kai, None, Some(10)).unwrap();
        let ids: Vec<_> = page.items.iter().map(|item| item.post.id).collect();
        assert_eq!(ids[..3], [public.id, sams.id, own.id]);
        // The rest are welcome posts from kai's and sam's worlds.
        assert_eq!(ids.len(), 5);
        assert!(page.items[3..].iter().all(|item| item.post.created_at == t0()));
        assert!(page.next_cursor.is_none());

        assert_eq!(page.items[0].relation, FeedRelation::Public);
        assert_eq!(page.items[2].relation, FeedRelation::Author);
        let FeedRelation::Friend { seen, replied, repliers, ref friend_access_token, .. } = page.items[1].relation else {
            panic!("expected a friend post");
        };
        assert!(seen);
        assert!(!replied);
        assert_eq!(repliers, 1);
        assert_eq!(friend_access_token, &kai_at_sam.access_token);
        assert_eq!(page.items[1].world_handle, "sam-world");
    }

    #[test]
    fn local_universe_paginates_by_five() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        for minute in 0..7 {
            post(&ctx, &kai, Visibility::Friends, Vec::new(), minute);
        }
        // Seven posts plus the welcome post.
        let first = local_universe(&ctx, &kai, None, None).unwrap();
        assert_eq!(first.items.len(), 5);
        let second = local_universe(&ctx, &kai, first.next_cursor, None).unwrap();
        assert_eq!(second.items.len(), 3);
        assert!(second.next_cursor.is_none());
    }

    #[test]
    fn universe_worlds_split_by_device() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        let (sam, _) = user(&ctx, "sam", "+15555550101", "sam-world");
        let (zed, _) = user(&ctx, "zed", "+15555550102", "zed-world");
        let (_quiet, _) = user(&ctx, "quiet", "+15555550103", "quiet-world");
        register_device(&ctx, Notifiable::User(sam.id));
        register_device(&ctx, Notifiable::User(zed.id));
        post(&ctx, &zed, Visibility::Public, Vec::new(), 1);

        let device = |owner: Notifiable, endpoint: &str, confidence: f64| {
            register_subscription(
                &ctx,
                Some(owner),
                &SubscriptionParams {
                    endpoint: endpoint.to_owned(),
                    p256dh_key: "p".to_owned(),
                    auth_key: "a".to_owned(),
                    service_worker_version: Some(2),
                    device_id: None,
                    device_fingerprint: Some("fp-1".to_owned()),
                    device_fingerprint_confidence: Some(confidence),
                },
                t0(),
            )
            .unwrap();
        };
        device(Notifiable::User(kai.id), "https://push.example.com/kai", 0.9);
        let kai_at_sam = friend(&ctx, &sam, "kai", None);
        device(Notifiable::Friend(kai_at_sam.id), "https://push.example.com/kai-sam", 0.5);
        let kai_at_zed = friend(&ctx, &zed, "kai", None);
        device(Notifiable::Friend(kai_at_zed.id), "https://push.example.com/kai-zed", 0.1);

        let worlds = universe_worlds(&ctx, Some(&kai)).unwrap();
        let handles = |list: &[UniverseWorld]| -> Vec<String> {
            let mut handles: Vec<String> = list.iter().map(|w| w.world.handle.clone()).collect();
            handles.sort();
            handles
        };
        assert_eq!(handles(&worlds.joined_worlds), vec!["kai-world", "sam-world"]);
        assert_eq!(handles(&worlds.other_worlds), vec!["zed-world"]);
        let zed_world = &worlds.other_worlds[0];
        assert_eq!(zed_world.post_count, 2);

        let anonymous = universe_worlds(&ctx, None).unwrap();
        assert!(anonymous.joined_worlds.is_empty());
        assert_eq!(anonymous.other_worlds.len(), 3);
        assert_eq!(anonymous.other_worlds[0].world.handle, "zed-world");
    }
}
