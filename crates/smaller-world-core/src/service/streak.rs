//! Posting streaks and the per-day timeline.

use super::Context;
use crate::error::Result;
use crate::model::{Post, User};
use crate::policy::{PostPolicy, Viewer};
use crate::storage::StoreExt;
use chrono::{DateTime, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Consecutive days with at least one post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PostStreak {
    pub length: u32,
    pub posted_today: bool,
}

/// One day of the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineDay {
    /// Emoji of the day's latest post.
    pub emoji: Option<String>,
    /// The day is part of a streak reaching today or yesterday.
    pub streak: bool,
}

fn local_date(at: DateTime<Utc>, tz: Tz) -> NaiveDate {
    at.with_timezone(&tz).date_naive()
}

/// The author's current streak in their own time zone.
///
/// `None` when the latest streak ended before yesterday.
pub fn post_streak(ctx: &Context<'_>, author: &User, now: DateTime<Utc>) -> Result<Option<PostStreak>> {
    let tz = author.time_zone();
    let dates: BTreeSet<NaiveDate> = ctx
        .store
        .filter::<Post>(|p| p.author_id == author.id)?
        .into_iter()
        .map(|p| local_date(p.created_at, tz))
        .collect();
    Ok(streak_from_dates(&dates, local_date(now, tz)))
}

fn streak_from_dates(dates: &BTreeSet<NaiveDate>, today: NaiveDate) -> Option<PostStreak> {
    let end = *dates.last()?;
    let yesterday = today.checked_sub_days(Days::new(1))?;
    if end < yesterday {
        return None;
    }
    let mut length = 0;
    let mut day = end;
    while dates.contains(&day) {
        length += 1;
        match day.checked_sub_days(Days::new(1)) {
            Some(previous) => day = previous,
            None => break,
        }
    }
    Some(PostStreak {
        length,
        posted_today: end == today,
    })
}

/// The author's posts per local day from `start_date`, as the viewer may
/// see them.
pub fn timeline(
    ctx: &Context<'_>,
    viewer: Viewer<'_>,
    author: &User,
    start_date: NaiveDate,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<BTreeMap<NaiveDate, TimelineDay>> {
    let policy = PostPolicy::new(viewer);
    let mut posts = ctx.store.filter::<Post>(|p| {
        p.author_id == author.id && policy.in_scope(p) && local_date(p.created_at, tz) >= start_date
    })?;
    posts.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    let mut days: BTreeMap<NaiveDate, TimelineDay> = BTreeMap::new();
    for post in posts {
        days.insert(
            local_date(post.created_at, tz),
            TimelineDay {
                emoji: post.emoji,
                streak: false,
            },
        );
    }

    let today = local_date(now, tz);
    let yesterday = today.checked_sub_days(Days::new(1));
    let dates: Vec<NaiveDate> = days.keys().rev().copied().collect();
    for date in dates {
        let recent = date == today || Some(date) == yesterday;
        let continues = date
            .checked_add_days(Days::new(1))
            .and_then(|next| days.get(&next))
            .is_some_and(|next| next.streak);
        if (recent || continues)
            && let Some(day) = days.get_mut(&date)
        {
            day.streak = true;
        }
    }
    Ok(days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PostType, Visibility};
    use crate::service::posts::{NewPost, create_post};
    use crate::service::testing::{Harness, t0, user};
    use chrono::Duration;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn post_at(ctx: &Context<'_>, author: &User, at: DateTime<Utc>, emoji: &str) {
        create_post(
            ctx,
            author,
            &NewPost {
                post_type: PostType::JournalEntry,
                visibility: Visibility::Friends,
                title: None,
                body_html: None,
                body_text: Some("today".to_owned()),
                emoji: Some(emoji.to_owned()),
                hidden_from_ids: Vec::new(),
                visible_to_ids: Vec::new(),
                pinned_until: None,
                quoted_post_id: None,
                encouragement_id: None,
                friend_ids_to_notify: None,
            },
            at,
        )
        .unwrap();
    }

    #[test]
    fn streak_counts_back_from_last_day() {
        let dates = BTreeSet::from([date(2025, 3, 1), date(2025, 3, 3), date(2025, 3, 4), date(2025, 3, 5)]);
        assert_eq!(
            streak_from_dates(&dates, date(2025, 3, 5)),
            Some(PostStreak {
                length: 3,
                posted_today: true
            })
        );
        assert_eq!(
            streak_from_dates(&dates, date(2025, 3, 6)),
            Some(PostStreak {
                length: 3,
                posted_today: false
            })
        );
        assert_eq!(streak_from_dates(&dates, date(2025, 3, 7)), None);
        assert_eq!(streak_from_dates(&BTreeSet::new(), date(2025, 3, 7)), None);
    }

    #[test]
    fn streak_uses_the_author_time_zone() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        // Welcome post: 2025-03-01 07:00 in New York.
        post_at(&ctx, &kai, t0() + Duration::days(1), "🌊");
        // 2025-03-03 01:30 UTC is still 2025-03-02 in New York.
        post_at(&ctx, &kai, t0() + Duration::hours(37) + Duration::minutes(30), "🌙");
        let streak = post_streak(&ctx, &kai, t0() + Duration::days(1) + Duration::hours(8)).unwrap();
        assert_eq!(
            streak,
            Some(PostStreak {
                length: 2,
                posted_today: true
            })
        );
    }

    #[test]
    fn timeline_marks_streak_days() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let (kai, _) = user(&ctx, "kai", "+15555550100", "kai-world");
        post_at(&ctx, &kai, t0() + Duration::days(2), "🌊");
        post_at(&ctx, &kai, t0() + Duration::days(3), "🌙");
        let days = timeline(
            &ctx,
            Viewer::User(&kai),
            &kai,
            date(2025, 2, 1),
            chrono_tz::UTC,
            t0() + Duration::days(3),
        )
        .unwrap();
        assert_eq!(days.len(), 3);
        assert!(!days[&date(2025, 3, 1)].streak);
        assert!(days[&date(2025, 3, 3)].streak);
        assert!(days[&date(2025, 3, 4)].streak);
        assert_eq!(days[&date(2025, 3, 4)].emoji.as_deref(), Some("🌙"));

        let public = timeline(
            &ctx,
            Viewer::Anonymous,
            &kai,
            date(2025, 2, 1),
            chrono_tz::UTC,
            t0() + Duration::days(3),
        )
        .unwrap();
        assert_eq!(public.len(), 1);
    }
}
