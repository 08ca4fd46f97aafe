//! # Notices
//!
//! What a notification says to its recipient: the push message for each
//! kind of noticeable, the legacy payloads older service workers expect,
//! and the SMS bodies sent to friends without push.

use crate::error::{Error, Result};
use crate::links::Links;
use crate::model::{
    Activity, ActivityCoupon, Encouragement, Friend, JoinRequest, Post, User, World,
};
use serde::Serialize;
use serde_json::{Value, json};

/// A rendered notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationMessage {
    pub title: String,
    pub body: String,
    pub image_src: Option<String>,
    pub target_url: Option<String>,
}

/// A noticeable, loaded together with the records its messages mention.
#[derive(Debug, Clone)]
pub enum Subject {
    Post {
        post: Post,
        author: User,
        world: World,
    },
    Friend {
        friend: Friend,
        /// The friend has at least one push registration.
        installed: bool,
    },
    Encouragement {
        encouragement: Encouragement,
        friend: Friend,
    },
    JoinRequest {
        join_request: JoinRequest,
    },
    ActivityCoupon {
        coupon: ActivityCoupon,
        activity: Activity,
        friend: Friend,
        owner: User,
        world: World,
    },
}

/// A loaded notification recipient.
#[derive(Debug, Clone)]
pub enum Recipient {
    User(User),
    Friend(Friend),
    Anonymous,
}

impl Subject {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Post { .. } => "Post",
            Self::Friend { .. } => "Friend",
            Self::Encouragement { .. } => "Encouragement",
            Self::JoinRequest { .. } => "JoinRequest",
            Self::ActivityCoupon { .. } => "ActivityCoupon",
        }
    }

    /// The message shown to `recipient`.
    pub fn message(&self, recipient: &Recipient, links: &Links) -> Result<NotificationMessage> {
        match (self, recipient) {
            (Self::Post { post, author, world }, recipient) => {
                let mut title = format!("new {}", post.post_type.humanize());
                let target_url = match recipient {
                    Recipient::Friend(friend) => {
                        links.friend_post_url(&world.handle, &friend.access_token, post.id)
                    }
                    Recipient::User(_) => {
                        title.push_str(&format!(" from {}", author.name));
                        links.local_universe_url(post.id)
                    }
                    Recipient::Anonymous => {
                        title.push_str(&format!(" from {}", author.name));
                        links.universe_url(post.id)
                    }
                };
                Ok(NotificationMessage {
                    title,
                    body: post.message_body(),
                    image_src: None,
                    target_url: Some(target_url),
                })
            }

            (Self::Friend { friend, installed }, Recipient::User(_)) => {
                let (title, body) = if *installed {
                    (
                        format!("{} installed your world!", friend.fun_name()),
                        format!("{} installed your world on their phone :)", friend.name),
                    )
                } else {
                    (
                        format!("{} joined your world!", friend.fun_name()),
                        format!("{} subscribed to text updates", friend.name),
                    )
                };
                Ok(NotificationMessage {
                    title,
                    body,
                    image_src: None,
                    target_url: Some(links.world_friends_url(friend.id)),
                })
            }

            (
                Self::Encouragement {
                    encouragement,
                    friend,
                },
                Recipient::User(_) | Recipient::Anonymous,
            ) => Ok(NotificationMessage {
                title: format!("{} wants to hear from u!", friend.name),
                body: format!("{} {}", encouragement.emoji, encouragement.message),
                image_src: None,
                target_url: Some(links.world_url()),
            }),

            (Self::JoinRequest { join_request }, Recipient::User(_)) => Ok(NotificationMessage {
                title: format!("{} wants to join your world!", join_request.name),
                body: format!(
                    "request from {} ({})",
                    join_request.name, join_request.phone_number
                ),
                image_src: None,
                target_url: Some(links.join_requests_url(join_request.id)),
            }),

            (
                Self::ActivityCoupon {
                    coupon,
                    activity,
                    friend,
                    owner,
                    world,
                },
                Recipient::Friend(_),
            ) => {
                let expires_on = coupon
                    .expires_at
                    .with_timezone(&owner.time_zone())
                    .format("%B %-d");
                Ok(NotificationMessage {
                    title: format!("{} with {}?", activity.fun_name(), owner.name),
                    body: format!(
                        "you have a coupon for {} with {}! it expires on {expires_on}, so reach out soon :)",
                        activity.name, owner.name
                    ),
                    image_src: None,
                    target_url: Some(links.user_url(
                        &world.handle,
                        &[
                            ("friend_token", friend.access_token.clone()),
                            ("intent", "activity_coupons".to_owned()),
                        ],
                    )),
                })
            }

            (subject, _) => Err(Error::InvalidRecipient(subject.kind())),
        }
    }

    /// Payload for version 1 service workers, for noticeables that have one.
    #[must_use]
    pub fn legacy_payload(&self, recipient: &Recipient) -> Option<Value> {
        match (self, recipient) {
            (Self::Post { post, .. }, Recipient::Friend(friend)) => Some(json!({
                "post": legacy_post(post),
                "friend_access_token": friend.access_token,
            })),
            (Self::Post { post, author, world }, Recipient::Anonymous) => Some(json!({
                "post": legacy_post(post),
                "world": {"handle": world.handle, "name": world.name(author)},
            })),
            (Self::Friend { friend, .. }, _) => Some(json!({ "friend": legacy_friend(friend) })),
            (
                Self::Encouragement {
                    encouragement,
                    friend,
                },
                _,
            ) => Some(json!({
                "encouragement": {
                    "id": encouragement.id,
                    "emoji": encouragement.emoji,
                    "message": encouragement.message,
                },
                "friend": legacy_friend(friend),
            })),
            _ => None,
        }
    }
}

fn legacy_post(post: &Post) -> Value {
    json!({
        "id": post.id,
        "emoji": post.emoji,
        "type": post.post_type,
        "title_snippet": post.title_snippet(),
        "body_snippet": post.body_snippet(),
        "image_src": null,
        "quoted_post_image_src": null,
    })
}

fn legacy_friend(friend: &Friend) -> Value {
    json!({
        "id": friend.id,
        "name": friend.name,
        "emoji": friend.emoji,
    })
}

// =============================================================================
// SMS BODIES
// =============================================================================

/// SMS copy of a post for a text-only friend.
#[must_use]
pub fn post_text_message(
    post: &Post,
    author: &User,
    world: &World,
    friend: &Friend,
    links: &Links,
) -> String {
    let title = format!("new {} from {}...", post.post_type.humanize(), author.name);
    let shortlink = links.user_shortlink(
        &world.handle,
        &[
            ("post_id", post.id.to_string()),
            ("friend_token", friend.access_token.clone()),
        ],
    );
    format!(
        "{title}\n\n{}\n\nsee full post: {shortlink}",
        post.message_body()
    )
}

/// Welcome SMS sent to a friend when they join.
#[must_use]
pub fn installation_message(friend: &Friend, owner: &User, world: &World, links: &Links) -> String {
    let possessive = owner.possessive_name();
    let url = links.user_shortlink(
        &world.handle,
        &[
            ("friend_token", friend.access_token.clone()),
            ("intent", "installation_instructions".to_owned()),
        ],
    );
    format!(
        "hi, {}! here's your secret link to {possessive} world: {url}\n\n\
         we'll send you occasional text updates, but if you're a REAL ONE you can click the link \
         to install {possessive} world for real-time life updates.\n",
        friend.fun_name()
    )
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ActivityId, EncouragementId, PostId};
    use crate::model::{PostType, Visibility};
    use chrono::{DateTime, TimeZone, Utc};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn links() -> Links {
        Links::new("https://smallerworld.club", Some("https://smlr.club")).unwrap()
    }

    fn setup() -> (User, World, Friend, Post) {
        let author = User::new("kai", "+15555550100", "UTC", now());
        let world = World::new(&author, "kai", now());
        let friend = Friend::new(author.id, "bob", Some("🐸"), now());
        let post = Post {
            id: PostId::new(),
            author_id: author.id,
            post_type: PostType::JournalEntry,
            visibility: Visibility::Public,
            title: Some("beach day".to_owned()),
            body_html: "<p>went swimming</p>".to_owned(),
            emoji: Some("🌊".to_owned()),
            hidden_from_ids: Vec::new(),
            visible_to_ids: Vec::new(),
            pinned_until: None,
            quoted_post_id: None,
            encouragement_id: None,
            created_at: now(),
            updated_at: now(),
        };
        (author, world, friend, post)
    }

    #[test]
    fn post_messages_by_recipient() {
        let (author, world, friend, post) = setup();
        let subject = Subject::Post {
            post: post.clone(),
            author: author.clone(),
            world,
        };

        let to_friend = subject.message(&Recipient::Friend(friend.clone()), &links()).unwrap();
        assert_eq!(to_friend.title, "new journal entry");
        assert_eq!(to_friend.body, "🌊 beach day\nwent swimming");
        assert_eq!(
            to_friend.target_url.unwrap(),
            format!(
                "https://smallerworld.club/kai/?friend_token={}&post_id={}",
                friend.access_token, post.id
            )
        );

        let to_user = subject.message(&Recipient::User(author), &links()).unwrap();
        assert_eq!(to_user.title, "new journal entry from kai");
        assert!(to_user.target_url.unwrap().contains("/world/universe?post_id="));

        let to_anyone = subject.message(&Recipient::Anonymous, &links()).unwrap();
        assert!(to_anyone.target_url.unwrap().contains("/universe/?post_id="));
    }

    #[test]
    fn friend_messages() {
        let (author, _, friend, _) = setup();
        let joined = Subject::Friend {
            friend: friend.clone(),
            installed: false,
        };
        let message = joined.message(&Recipient::User(author.clone()), &links()).unwrap();
        assert_eq!(message.title, "🐸 bob joined your world!");
        assert_eq!(message.body, "bob subscribed to text updates");

        let installed = Subject::Friend {
            friend: friend.clone(),
            installed: true,
        };
        let message = installed.message(&Recipient::User(author), &links()).unwrap();
        assert_eq!(message.title, "🐸 bob installed your world!");

        assert!(matches!(
            installed.message(&Recipient::Friend(friend), &links()),
            Err(Error::InvalidRecipient("Friend"))
        ));
    }

    #[test]
    fn encouragement_and_join_request_messages() {
        let (author, world, friend, _) = setup();
        let encouragement = Subject::Encouragement {
            encouragement: Encouragement {
                id: EncouragementId::new(),
                friend_id: friend.id,
                emoji: "💌".to_owned(),
                message: "post more!".to_owned(),
                created_at: now(),
            },
            friend,
        };
        let message = encouragement
            .message(&Recipient::User(author.clone()), &links())
            .unwrap();
        assert_eq!(message.title, "bob wants to hear from u!");
        assert_eq!(message.body, "💌 post more!");

        let request = Subject::JoinRequest {
            join_request: JoinRequest::new(world.id, "sam", "+15555550177", now()),
        };
        let message = request.message(&Recipient::User(author), &links()).unwrap();
        assert_eq!(message.title, "sam wants to join your world!");
        assert_eq!(message.body, "request from sam (+15555550177)");
        assert!(request.message(&Recipient::Anonymous, &links()).is_err());
    }

    #[test]
    fn activity_coupon_messages() {
        let (author, world, friend, _) = setup();
        let activity = Activity {
            id: ActivityId::new(),
            world_id: world.id,
            name: "coffee".to_owned(),
            emoji: Some("☕".to_owned()),
            description: String::new(),
            created_at: now(),
        };
        let coupon = ActivityCoupon::issue(friend.id, activity.id, now());
        let subject = Subject::ActivityCoupon {
            coupon,
            activity,
            friend: friend.clone(),
            owner: author.clone(),
            world,
        };
        let message = subject.message(&Recipient::Friend(friend), &links()).unwrap();
        assert_eq!(message.title, "☕ coffee with kai?");
        assert!(message.body.contains("April 1"));
        assert!(subject.message(&Recipient::User(author), &links()).is_err());
    }

    #[test]
    fn legacy_payloads() {
        let (author, world, friend, post) = setup();
        let subject = Subject::Post {
            post,
            author: author.clone(),
            world,
        };
        let payload = subject.legacy_payload(&Recipient::Friend(friend.clone())).unwrap();
        assert_eq!(payload["friend_access_token"], friend.access_token);
        assert_eq!(payload["post"]["title_snippet"], "> 🌊 beach day");
        assert!(subject.legacy_payload(&Recipient::Anonymous).is_some());
        assert!(subject.legacy_payload(&Recipient::User(author)).is_none());
    }

    #[test]
    fn text_messages() {
        let (author, world, friend, post) = setup();
        let text = post_text_message(&post, &author, &world, &friend, &links());
        assert_eq!(
            text,
            format!(
                "new journal entry from kai...\n\n🌊 beach day\nwent swimming\n\nsee full post: https://smlr.club/kai?post_id={}&friend_token={}",
                post.id, friend.access_token
            )
        );

        let welcome = installation_message(&friend, &author, &world, &links());
        assert!(welcome.starts_with("hi, 🐸 bob! here's your secret link to kai's world: https://smlr.club/kai?friend_token="));
        assert!(welcome.contains("intent=installation_instructions"));
    }
}
