//! # Post Policy
//!
//! Who may see, share, manage and react to a post.
//!
//! A viewer is a friend (identified by access token), a signed-in user, or
//! anonymous. Visibility combines the post's audience with its per-post
//! `hidden_from_ids` and `visible_to_ids` friend lists:
//!
//! | visibility      | friend may view when                   |
//! |-----------------|----------------------------------------|
//! | `public`        | always                                 |
//! | `friends`       | always                                 |
//! | `chosen_family` | friend is chosen family                |
//! | `secret`        | friend is listed in `visible_to_ids`   |
//! | `only_me`       | never                                  |
//!
//! A friend only ever sees posts of the world they belong to, and never a
//! post they are hidden from.

use crate::error::{Error, Result};
use crate::model::{Friend, Post, User, Visibility};

/// The party asking for access.
#[derive(Debug, Clone, Copy)]
pub enum Viewer<'a> {
    Friend(&'a Friend),
    User(&'a User),
    Anonymous,
}

/// Actions guarded by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Show,
    Share,
    Manage,
    MarkSeen,
    MarkReplied,
}

/// Authorization for posts.
#[derive(Debug, Clone, Copy)]
pub struct PostPolicy<'a> {
    viewer: Viewer<'a>,
    admin: bool,
}

impl<'a> PostPolicy<'a> {
    #[must_use]
    pub fn new(viewer: Viewer<'a>) -> Self {
        Self {
            viewer,
            admin: false,
        }
    }

    /// Policy for a viewer that may be an admin user.
    #[must_use]
    pub fn with_admin(viewer: Viewer<'a>, admin: bool) -> Self {
        Self {
            viewer,
            admin: admin && matches!(viewer, Viewer::User(_)),
        }
    }

    #[must_use]
    pub fn viewer(&self) -> Viewer<'a> {
        self.viewer
    }

    /// Whether the rule passes. `author` is the post's author.
    #[must_use]
    pub fn allowed(&self, rule: Rule, post: &Post, author: &User) -> bool {
        if self.admin {
            return true;
        }
        match (rule, self.viewer) {
            (Rule::Show, Viewer::Friend(friend)) => friend_can_view(post, friend),
            (Rule::Show, Viewer::User(user)) => user.id == post.author_id,
            (Rule::Show, Viewer::Anonymous) => post.visibility == Visibility::Public,

            (Rule::Share, Viewer::Friend(friend)) => {
                friend_can_view(post, friend)
                    && (post.visibility == Visibility::Public || author.allow_friend_sharing)
            }
            (Rule::Share, Viewer::User(user)) => user.id == post.author_id,
            (Rule::Share, Viewer::Anonymous) => false,

            (Rule::Manage, Viewer::User(user)) => user.id == post.author_id,
            (Rule::Manage, _) => false,

            (Rule::MarkSeen | Rule::MarkReplied, Viewer::Friend(friend)) => {
                friend_can_view(post, friend)
            }
            (Rule::MarkSeen | Rule::MarkReplied, _) => false,
        }
    }

    /// Like [`PostPolicy::allowed`], but as a `Result`.
    ///
    /// Fails with `NotAuthenticated` when the rule needs a kind of viewer
    /// that is missing, and with `Forbidden` otherwise.
    pub fn authorize(&self, rule: Rule, post: &Post, author: &User) -> Result<()> {
        if self.allowed(rule, post, author) {
            return Ok(());
        }
        let missing_viewer = match rule {
            Rule::Manage => !matches!(self.viewer, Viewer::User(_)),
            Rule::MarkSeen | Rule::MarkReplied => !matches!(self.viewer, Viewer::Friend(_)),
            Rule::Show | Rule::Share => false,
        };
        if missing_viewer {
            Err(Error::NotAuthenticated)
        } else {
            Err(Error::Forbidden)
        }
    }

    /// Whether a post belongs in this viewer's listing.
    ///
    /// Friends see what they may view, users see their own posts,
    /// anonymous viewers see public posts.
    #[must_use]
    pub fn in_scope(&self, post: &Post) -> bool {
        match self.viewer {
            Viewer::Friend(friend) => friend_can_view(post, friend),
            Viewer::User(user) => user.id == post.author_id,
            Viewer::Anonymous => post.visibility == Visibility::Public,
        }
    }

    /// Filter posts down to this viewer's scope.
    #[must_use]
    pub fn scope<'p>(&self, posts: impl IntoIterator<Item = &'p Post>) -> Vec<&'p Post> {
        posts.into_iter().filter(|post| self.in_scope(post)).collect()
    }
}

/// Whether a friend may see a post.
#[must_use]
pub fn friend_can_view(post: &Post, friend: &Friend) -> bool {
    if friend.user_id != post.author_id || post.hidden_from_ids.contains(&friend.id) {
        return false;
    }
    match post.visibility {
        Visibility::Public | Visibility::Friends => true,
        Visibility::ChosenFamily => friend.chosen_family,
        Visibility::Secret => post.visible_to_ids.contains(&friend.id),
        Visibility::OnlyMe => false,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PostId;
    use crate::model::PostType;
    use chrono::{DateTime, Utc};

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
    }

    struct Fixture {
        author: User,
        stranger: User,
        friend: Friend,
        family: Friend,
        outsider: Friend,
    }

    fn fixture() -> Fixture {
        let author = User::new("kai", "+15555550100", "UTC", now());
        let stranger = User::new("sam", "+15555550101", "UTC", now());
        let friend = Friend::new(author.id, "bob", None, now());
        let mut family = Friend::new(author.id, "mom", None, now());
        family.chosen_family = true;
        let outsider = Friend::new(stranger.id, "eve", None, now());
        Fixture {
            author,
            stranger,
            friend,
            family,
            outsider,
        }
    }

    fn post(author: &User, visibility: Visibility) -> Post {
        Post {
            id: PostId::new(),
            author_id: author.id,
            post_type: PostType::JournalEntry,
            visibility,
            title: None,
            body_html: "<p>hi</p>".to_owned(),
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
    fn friend_visibility_by_audience() {
        let f = fixture();
        let public = post(&f.author, Visibility::Public);
        let friends = post(&f.author, Visibility::Friends);
        let family = post(&f.author, Visibility::ChosenFamily);
        let only_me = post(&f.author, Visibility::OnlyMe);

        assert!(friend_can_view(&public, &f.friend));
        assert!(friend_can_view(&friends, &f.friend));
        assert!(!friend_can_view(&family, &f.friend));
        assert!(friend_can_view(&family, &f.family));
        assert!(!friend_can_view(&only_me, &f.family));
    }

    #[test]
    fn secret_posts_need_visible_to() {
        let f = fixture();
        let mut secret = post(&f.author, Visibility::Secret);
        assert!(!friend_can_view(&secret, &f.friend));
        secret.visible_to_ids.push(f.friend.id);
        assert!(friend_can_view(&secret, &f.friend));
        assert!(!friend_can_view(&secret, &f.family));
    }

    #[test]
    fn hidden_from_wins() {
        let f = fixture();
        let mut public = post(&f.author, Visibility::Public);
        public.hidden_from_ids.push(f.friend.id);
        assert!(!friend_can_view(&public, &f.friend));
        assert!(friend_can_view(&public, &f.family));
    }

    #[test]
    fn friends_of_other_worlds_see_nothing() {
        let f = fixture();
        let public = post(&f.author, Visibility::Public);
        assert!(!friend_can_view(&public, &f.outsider));
    }

    #[test]
    fn users_only_manage_their_own_posts() {
        let f = fixture();
        let friends = post(&f.author, Visibility::Friends);
        let author = PostPolicy::new(Viewer::User(&f.author));
        let stranger = PostPolicy::new(Viewer::User(&f.stranger));

        assert!(author.authorize(Rule::Manage, &friends, &f.author).is_ok());
        assert!(matches!(
            stranger.authorize(Rule::Manage, &friends, &f.author),
            Err(Error::Forbidden)
        ));
        assert!(matches!(
            PostPolicy::new(Viewer::Friend(&f.friend)).authorize(Rule::Manage, &friends, &f.author),
            Err(Error::NotAuthenticated)
        ));
    }

    #[test]
    fn anonymous_viewers_see_public_posts_only() {
        let f = fixture();
        let anonymous = PostPolicy::new(Viewer::Anonymous);
        assert!(anonymous.allowed(Rule::Show, &post(&f.author, Visibility::Public), &f.author));
        assert!(!anonymous.allowed(Rule::Show, &post(&f.author, Visibility::Friends), &f.author));
        assert!(!anonymous.allowed(Rule::Share, &post(&f.author, Visibility::Public), &f.author));
    }

    #[test]
    fn sharing_respects_author_preference() {
        let mut f = fixture();
        let friends = post(&f.author, Visibility::Friends);
        let public = post(&f.author, Visibility::Public);
        let policy = PostPolicy::new(Viewer::Friend(&f.friend));
        assert!(policy.allowed(Rule::Share, &friends, &f.author));

        f.author.allow_friend_sharing = false;
        let policy = PostPolicy::new(Viewer::Friend(&f.friend));
        assert!(!policy.allowed(Rule::Share, &friends, &f.author));
        assert!(policy.allowed(Rule::Share, &public, &f.author));
    }

    #[test]
    fn marking_requires_a_friend() {
        let f = fixture();
        let friends = post(&f.author, Visibility::Friends);
        let family = post(&f.author, Visibility::ChosenFamily);
        let friend = PostPolicy::new(Viewer::Friend(&f.friend));
        assert!(friend.authorize(Rule::MarkSeen, &friends, &f.author).is_ok());
        assert!(matches!(
            friend.authorize(Rule::MarkReplied, &family, &f.author),
            Err(Error::Forbidden)
        ));
        assert!(matches!(
            PostPolicy::new(Viewer::User(&f.author)).authorize(Rule::MarkSeen, &friends, &f.author),
            Err(Error::NotAuthenticated)
        ));
    }

    #[test]
    fn admins_are_allowed_everything() {
        let f = fixture();
        let only_me = post(&f.author, Visibility::OnlyMe);
        let admin = PostPolicy::with_admin(Viewer::User(&f.stranger), true);
        assert!(admin.allowed(Rule::Manage, &only_me, &f.author));
        assert!(admin.allowed(Rule::MarkSeen, &only_me, &f.author));
        let not_admin = PostPolicy::with_admin(Viewer::Anonymous, true);
        assert!(!not_admin.allowed(Rule::Show, &only_me, &f.author));
    }

    #[test]
    fn scopes() {
        let f = fixture();
        let posts = vec![
            post(&f.author, Visibility::Public),
            post(&f.author, Visibility::ChosenFamily),
            post(&f.author, Visibility::OnlyMe),
            post(&f.stranger, Visibility::Public),
        ];
        assert_eq!(PostPolicy::new(Viewer::Friend(&f.friend)).scope(&posts).len(), 1);
        assert_eq!(PostPolicy::new(Viewer::Friend(&f.family)).scope(&posts).len(), 2);
        assert_eq!(PostPolicy::new(Viewer::User(&f.author)).scope(&posts).len(), 3);
        assert_eq!(PostPolicy::new(Viewer::Anonymous).scope(&posts).len(), 2);
    }
}
