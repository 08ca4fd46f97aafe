//! # Links
//!
//! Absolute URLs embedded in notifications, SMS messages and push payloads.

use crate::ids::{FriendId, InvitationId, JoinRequestId, PostId};
use url::Url;

/// Builds absolute URLs from the configured base URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Links {
    base_url: Url,
    shortlink_base_url: Url,
}

impl Links {
    pub fn new(base_url: &str, shortlink_base_url: Option<&str>) -> Result<Self, url::ParseError> {
        let base_url = Url::parse(base_url.trim())?;
        let shortlink_base_url = match shortlink_base_url {
            Some(url) => Url::parse(url.trim())?,
            None => base_url.clone(),
        };
        Ok(Self {
            base_url,
            shortlink_base_url,
        })
    }

    /// A world's page, as seen by a friend.
    #[must_use]
    pub fn user_url(&self, handle: &str, params: &[(&str, String)]) -> String {
        build(&self.base_url, &format!("/{handle}/"), params)
    }

    /// Short version of [`Links::user_url`] for SMS messages.
    #[must_use]
    pub fn user_shortlink(&self, handle: &str, params: &[(&str, String)]) -> String {
        build(&self.shortlink_base_url, &format!("/{handle}"), params)
    }

    /// A friend's link to a post in a world.
    #[must_use]
    pub fn friend_post_url(&self, handle: &str, friend_token: &str, post_id: PostId) -> String {
        self.user_url(
            handle,
            &[
                ("friend_token", friend_token.to_owned()),
                ("post_id", post_id.to_string()),
            ],
        )
    }

    /// The signed-in user's universe feed, focused on a post.
    #[must_use]
    pub fn local_universe_url(&self, post_id: PostId) -> String {
        build(&self.base_url, "/world/universe", &[("post_id", post_id.to_string())])
    }

    /// The public universe feed, focused on a post.
    #[must_use]
    pub fn universe_url(&self, post_id: PostId) -> String {
        build(&self.base_url, "/universe/", &[("post_id", post_id.to_string())])
    }

    /// The signed-in user's own world.
    #[must_use]
    pub fn world_url(&self) -> String {
        build(&self.base_url, "/world", &[])
    }

    #[must_use]
    pub fn world_friends_url(&self, friend_id: FriendId) -> String {
        build(&self.base_url, "/world/friends", &[("friend_id", friend_id.to_string())])
    }

    /// The page an invitee opens to accept.
    #[must_use]
    pub fn invitation_url(&self, invitation_id: InvitationId) -> String {
        build(&self.base_url, &format!("/invitations/{invitation_id}"), &[])
    }

    #[must_use]
    pub fn join_requests_url(&self, join_request_id: JoinRequestId) -> String {
        build(
            &self.base_url,
            "/world/join_requests",
            &[("join_request_id", join_request_id.to_string())],
        )
    }
}

/// `path` under `base`, with `params` form-encoded into the query.
fn build(base: &Url, path: &str, params: &[(&str, String)]) -> String {
    let mut url = base.clone();
    url.set_path(&format!("{}{path}", base.path().trim_end_matches('/')));
    url.set_query(None);
    url.set_fragment(None);
    if !params.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(params.iter().map(|(key, value)| (*key, value.as_str())));
    }
    url.into()
}
