//! Login codes, registration and sessions.

use super::{Context, Effect, Outcome};
use crate::error::{Result, ValidationErrors};
use crate::ids::{LoginRequestId, PostId, SessionId};
use crate::model::{LoginRequest, Post, PostType, Session, User, Visibility, World};
use crate::storage::StoreExt;
use crate::token::{Purpose, TokenError};
use chrono::{DateTime, Duration, Utc};
use subtle::ConstantTimeEq;

/// How long a registration token stays valid after login.
pub const REGISTRATION_TOKEN_LIFETIME_SECS: i64 = 60 * 60;

const WELCOME_TITLE: &str = "welcome to my smaller world!";
const WELCOME_BODY: &str = "<p>this is a space where i'll:</p><ul>\
<li><p>keep you updated about what's actually going on in my life</p></li>\
<li><p>post asks for help when i need it</p></li>\
<li><p>let you know about events and adventures that you can join me on</p></li></ul>";

// =============================================================================
// LOGIN
// =============================================================================

/// Create a login code for a phone number. The code is texted when
/// delivery is enabled.
pub fn create_login_request(
    ctx: &Context<'_>,
    phone_number: &str,
    now: DateTime<Utc>,
) -> Result<Outcome<LoginRequest>> {
    let request = LoginRequest::new(phone_number, now);
    request.validate().into_result()?;
    ctx.store.put(&request)?;
    let mut effects = Vec::new();
    if ctx.settings.deliver_login_codes {
        effects.push(Effect::SendSms {
            to: request.phone_number.clone(),
            body: request.message(),
        });
    }
    Ok(Outcome::new(request, effects))
}

/// Result of a successful code check.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginVerification {
    /// The phone number belongs to a user.
    Existing(User),
    /// New phone number: the token lets it register.
    Registration { token: String },
}

/// Check a login code (or the special occasion code).
pub fn verify_login(
    ctx: &Context<'_>,
    login_request_id: LoginRequestId,
    code: &str,
    now: DateTime<Utc>,
) -> Result<LoginVerification> {
    let mut request: LoginRequest = ctx.store.fetch(login_request_id)?;
    let code = code.trim();
    let mut errors = ValidationErrors::new();
    if !request.valid(now) {
        errors.add("login_code", "has expired");
        return Err(errors.into());
    }
    let matches_code = bool::from(code.as_bytes().ct_eq(request.login_code.as_bytes()));
    let matches_special = ctx
        .settings
        .special_occasion_code
        .as_deref()
        .is_some_and(|special| bool::from(code.as_bytes().ct_eq(special.as_bytes())));
    if !matches_code && !matches_special {
        errors.add("login_code", "is incorrect");
        return Err(errors.into());
    }

    request.completed_at = Some(now);
    ctx.store.put(&request)?;

    let phone_number = request.phone_number.clone();
    match ctx.store.find::<User>(|u| u.phone_number == phone_number)? {
        Some(user) => Ok(LoginVerification::Existing(user)),
        None => Ok(LoginVerification::Registration {
            token: ctx.signer.sign(
                Purpose::Registration,
                request.id,
                &request.phone_number,
                Some(now + Duration::seconds(REGISTRATION_TOKEN_LIFETIME_SECS)),
            ),
        }),
    }
}

// =============================================================================
// REGISTRATION
// =============================================================================

/// Fields for a new user and their world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub phone_number: String,
    pub time_zone_name: String,
    pub handle: String,
}

/// Register a user whose phone number was verified by [`verify_login`].
pub fn register(
    ctx: &Context<'_>,
    registration_token: &str,
    name: &str,
    handle: &str,
    time_zone_name: &str,
    now: DateTime<Utc>,
) -> Result<Outcome<(User, World)>> {
    let verified = ctx
        .signer
        .verify(registration_token, Purpose::Registration, now)?;
    let request: LoginRequest = ctx.store.fetch(LoginRequestId::from(verified.id))?;
    verified.expect_fingerprint(&request.phone_number)?;
    if request.completed_at.is_none() {
        return Err(TokenError::Stale.into());
    }
    create_user(
        ctx,
        &NewUser {
            name: name.to_owned(),
            phone_number: request.phone_number,
            time_zone_name: time_zone_name.to_owned(),
            handle: handle.to_owned(),
        },
        now,
    )
}

/// Create a user, their world and the world's welcome post.
pub fn create_user(
    ctx: &Context<'_>,
    params: &NewUser,
    now: DateTime<Utc>,
) -> Result<Outcome<(User, World)>> {
    let user = User::new(&params.name, &params.phone_number, &params.time_zone_name, now);
    let world = World::new(&user, &params.handle, now);

    let mut errors = user.validate();
    errors.merge(world.validate());
    if ctx
        .store
        .find::<User>(|u| u.phone_number == user.phone_number)?
        .is_some()
    {
        errors.add("phone_number", "has already been taken");
    }
    if ctx.store.find::<World>(|w| w.handle == world.handle)?.is_some() {
        errors.add("handle", "has already been taken");
    }
    errors.into_result()?;

    ctx.store.put(&user)?;
    ctx.store.put(&world)?;
    ctx.store.put(&welcome_post(&user, &world))?;
    Ok(Outcome::pure((user, world)))
}

/// Public welcome journal entry, dated with the world so it never counts
/// as user-created.
fn welcome_post(owner: &User, world: &World) -> Post {
    Post {
        id: PostId::new(),
        author_id: owner.id,
        post_type: PostType::JournalEntry,
        visibility: Visibility::Public,
        title: Some(WELCOME_TITLE.to_owned()),
        body_html: WELCOME_BODY.to_owned(),
        emoji: Some("🌎".to_owned()),
        hidden_from_ids: Vec::new(),
        visible_to_ids: Vec::new(),
        pinned_until: None,
        quoted_post_id: None,
        encouragement_id: None,
        created_at: world.created_at,
        updated_at: world.created_at,
    }
}

// =============================================================================
// SESSIONS
// =============================================================================

/// Start a session and return it with its signed cookie value.
pub fn start_session(
    ctx: &Context<'_>,
    user: &User,
    ip_address: &str,
    user_agent: &str,
    now: DateTime<Utc>,
) -> Result<(Session, String)> {
    let session = Session {
        id: SessionId::new(),
        user_id: user.id,
        ip_address: ip_address.trim().to_owned(),
        user_agent: user_agent.trim().to_owned(),
        created_at: now,
    };
    session.validate().into_result()?;
    ctx.store.put(&session)?;
    let token = ctx.signer.sign(Purpose::Session, session.id, "", None);
    Ok((session, token))
}

/// Resolve a session cookie. Invalid or revoked cookies resolve to `None`.
pub fn resume_session(
    ctx: &Context<'_>,
    token: &str,
    now: DateTime<Utc>,
) -> Result<Option<(Session, User)>> {
    let Ok(verified) = ctx.signer.verify(token, Purpose::Session, now) else {
        return Ok(None);
    };
    let Some(session) = ctx.store.get::<Session>(SessionId::from(verified.id))? else {
        return Ok(None);
    };
    match ctx.store.get::<User>(session.user_id)? {
        Some(user) => Ok(Some((session, user))),
        None => Ok(None),
    }
}

/// End a session. Unknown sessions are ignored.
pub fn terminate_session(ctx: &Context<'_>, session_id: SessionId) -> Result<()> {
    ctx.store.delete::<Session>(session_id)?;
    Ok(())
}

/// Look up the user behind an external (Supabase) identity.
pub fn user_by_id(ctx: &Context<'_>, id: uuid::Uuid) -> Result<Option<User>> {
    ctx.store.get::<User>(crate::ids::UserId::from(id))
}
