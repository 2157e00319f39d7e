//! Merges per-server fetch results into one [`StatsSnapshot`].

use std::collections::HashSet;

use crate::ranking::{ContentMap, TOP_N, Tally};
use crate::session::{NetworkLocation, Session, StreamDecision};
use crate::snapshot::{
    BackendStatus, BandwidthStats, ContentStat, LibraryInfo, LibraryKind, LibraryTotals,
    PlatformActivity, ServerDetail, SessionSource, StatsSnapshot, UserActivity,
};

/// Everything one server fetch produced. Failures are folded in: an
/// unreachable server is `online == false` with empty collections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerState {
    pub server_id: i64,
    pub name: String,
    pub online: bool,
    pub shared_users: Vec<String>,
    pub pending_invites: Vec<String>,
    pub sessions: Vec<Session>,
    pub libraries: Vec<LibraryInfo>,
    pub session_source: Option<SessionSource>,
    pub error: Option<String>,
}

impl ServerState {
    pub fn offline(server_id: i64, name: &str, error: impl Into<String>) -> Self {
        Self {
            server_id,
            name: name.to_string(),
            online: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Scalar counters read straight from the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScalarCounts {
    pub total_users: u64,
    pub plex_server_count: u64,
    pub iptv_panel_count: u64,
    pub plex_expiring_7_days: u64,
    pub plex_expiring_30_days: u64,
    pub iptv_expiring_7_days: u64,
    pub iptv_expiring_30_days: u64,
    pub pending_requests: u64,
}

/// Case-insensitive set of user identities that remembers first-seen order.
#[derive(Debug, Clone, Default)]
pub struct UserSet {
    seen: HashSet<String>,
    order: Vec<String>,
}

impl UserSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when `user` was not already present.
    pub fn insert(&mut self, user: &str) -> bool {
        let key = user.trim().to_lowercase();
        if key.is_empty() || !self.seen.insert(key.clone()) {
            return false;
        }
        self.order.push(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

impl<'a> Extend<&'a str> for UserSet {
    fn extend<T: IntoIterator<Item = &'a str>>(&mut self, iter: T) {
        for user in iter {
            self.insert(user);
        }
    }
}

/// Merge server states (in registration order) and scalar counts into a
/// snapshot. Resource metrics are left `None`; attribution runs afterwards.
pub fn merge(counts: ScalarCounts, states: Vec<ServerState>, generated_at: String) -> StatsSnapshot {
    let mut users = UserSet::new();
    let mut invites = UserSet::new();
    let mut viewers = UserSet::new();
    let mut details = Vec::with_capacity(states.len());
    let mut sessions = Vec::new();
    let mut totals = LibraryTotals::default();

    for state in states {
        users.extend(state.shared_users.iter().map(String::as_str));
        invites.extend(state.pending_invites.iter().map(String::as_str));
        viewers.extend(state.sessions.iter().map(|s| s.user.as_str()));
        if state.online {
            add_library_totals(&mut totals, &state.libraries);
        }

        details.push(ServerDetail {
            id: state.server_id,
            name: state.name,
            status: if state.online {
                BackendStatus::Online
            } else {
                BackendStatus::Offline
            },
            user_count: state.shared_users.len() as u64,
            pending_invites: state.pending_invites.len() as u64,
            session_count: state.sessions.len() as u64,
            cpu_percent: None,
            memory_percent: None,
            libraries: state.libraries,
            session_source: state.session_source,
            error: state.error,
        });
        sessions.extend(state.sessions);
    }

    let online = details
        .iter()
        .filter(|d| d.status == BackendStatus::Online)
        .count() as u64;
    let rankings = Rankings::from_sessions(&sessions);

    StatsSnapshot {
        total_users: counts.total_users,
        plex_server_count: counts.plex_server_count,
        iptv_panel_count: counts.iptv_panel_count,
        plex_expiring_7_days: counts.plex_expiring_7_days,
        plex_expiring_30_days: counts.plex_expiring_30_days,
        iptv_expiring_7_days: counts.iptv_expiring_7_days,
        iptv_expiring_30_days: counts.iptv_expiring_30_days,
        pending_requests: counts.pending_requests,
        unique_plex_users: users.len() as u64,
        pending_plex_invites: invites.len() as u64,
        total_live_sessions: details.iter().map(|d| d.session_count).sum(),
        unique_live_viewers: viewers.len() as u64,
        plex_servers_online: online,
        plex_servers_offline: details.len() as u64 - online,
        bandwidth: bandwidth(&sessions),
        most_popular_content: rankings.most_popular,
        most_watched_content: rankings.most_watched,
        most_active_users: rankings.users,
        most_active_platforms: rankings.platforms,
        live_sessions: sessions,
        plex_servers: details,
        library_totals: totals,
        generated_at: Some(generated_at),
    }
}

struct Rankings {
    most_popular: Vec<ContentStat>,
    most_watched: Vec<ContentStat>,
    users: Vec<UserActivity>,
    platforms: Vec<PlatformActivity>,
}

impl Rankings {
    fn from_sessions(sessions: &[Session]) -> Self {
        let mut content = ContentMap::new();
        let mut users = Tally::new();
        let mut platforms = Tally::new();
        for session in sessions {
            content.record(
                session.content_key(),
                &session.user,
                session.thumb.as_deref(),
                &session.media_type,
                session.year,
            );
            users.add(&session.user);
            platforms.add(&session.platform);
        }

        let to_stat = |c: &crate::ranking::ContentAggregate| ContentStat {
            title: c.title.clone(),
            thumb: c.thumb.clone(),
            media_type: c.media_type.clone(),
            plays: c.plays,
            user_count: c.viewer_count(),
        };
        Self {
            most_popular: content.most_popular(TOP_N).into_iter().map(to_stat).collect(),
            most_watched: content.most_watched(TOP_N).into_iter().map(to_stat).collect(),
            users: users
                .top(TOP_N)
                .into_iter()
                .map(|(username, plays)| UserActivity { username, plays })
                .collect(),
            platforms: platforms
                .top(TOP_N)
                .into_iter()
                .map(|(platform, plays)| PlatformActivity { platform, plays })
                .collect(),
        }
    }
}

/// Bitrate sums (all and WAN-only) and per-decision counts.
pub fn bandwidth(sessions: &[Session]) -> BandwidthStats {
    let mut stats = BandwidthStats::default();
    for session in sessions {
        let kbps = session.bitrate_kbps.unwrap_or(0);
        stats.total_kbps += kbps;
        if session.location == NetworkLocation::Wan {
            stats.wan_kbps += kbps;
        }
        match session.decision {
            StreamDecision::DirectPlay => stats.direct_play += 1,
            StreamDecision::DirectStream => stats.direct_stream += 1,
            StreamDecision::Transcode => stats.transcode += 1,
            StreamDecision::Unknown => stats.unknown += 1,
        }
    }
    stats.total_mbps = round_mbps(stats.total_kbps);
    stats.wan_mbps = round_mbps(stats.wan_kbps);
    stats
}

fn round_mbps(kbps: u64) -> f64 {
    (kbps as f64 / 100.0).round() / 10.0
}

fn add_library_totals(totals: &mut LibraryTotals, libraries: &[LibraryInfo]) {
    for lib in libraries {
        match lib.kind {
            LibraryKind::Movie => totals.movies += lib.item_count,
            LibraryKind::Show => {
                totals.shows += lib.item_count;
                totals.seasons += lib.season_count.unwrap_or(0);
                totals.episodes += lib.episode_count.unwrap_or(0);
            },
            LibraryKind::Artist => {
                totals.artists += lib.item_count;
                totals.albums += lib.album_count.unwrap_or(0);
            },
            LibraryKind::Photo | LibraryKind::Other => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::session;

    fn online(id: i64, name: &str, sessions: Vec<Session>) -> ServerState {
        ServerState {
            server_id: id,
            name: name.to_string(),
            online: true,
            sessions,
            session_source: Some(SessionSource::Gateway),
            ..ServerState::default()
        }
    }

    #[test]
    fn three_server_scenario() {
        let a = online(1, "A", (0..5).map(|i| session(&format!("user{i}"), "Movie")).collect());
        let b = online(2, "B", Vec::new());
        let c = ServerState::offline(3, "C", "timed out");
        let snap = merge(ScalarCounts::default(), vec![a, b, c], "now".into());

        assert_eq!(snap.plex_servers_online, 2);
        assert_eq!(snap.plex_servers_offline, 1);
        assert_eq!(snap.total_live_sessions, 5);
        assert_eq!(snap.live_sessions.len(), 5);
        assert_eq!(snap.plex_servers[2].status, BackendStatus::Offline);
        assert_eq!(snap.plex_servers[2].error.as_deref(), Some("timed out"));
        let names: Vec<_> = snap.plex_servers.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn show_x_viewers_dedup_by_case() {
        let mut first = session("alice@x.com", "Pilot");
        first.grandparent_title = Some("Show X".into());
        let mut second = session("ALICE@x.com", "Episode 2");
        second.grandparent_title = Some("Show X".into());
        let snap = merge(
            ScalarCounts::default(),
            vec![online(1, "A", vec![first, second])],
            "now".into(),
        );

        let show = &snap.most_popular_content[0];
        assert_eq!(show.title, "Show X");
        assert_eq!(show.user_count, 1);
        assert_eq!(show.plays, 2);
        assert_eq!(snap.unique_live_viewers, 1);
        assert_eq!(snap.most_active_users.len(), 1);
        assert_eq!(snap.most_active_users[0].plays, 2);
    }

    #[test]
    fn shared_users_and_invites_dedup_across_servers() {
        let mut a = online(1, "A", Vec::new());
        a.shared_users = vec!["bob@x.com".into(), "carol@x.com".into()];
        a.pending_invites = vec!["dan@x.com".into()];
        let mut b = online(2, "B", Vec::new());
        b.shared_users = vec!["BOB@x.com".into()];
        b.pending_invites = vec!["Dan@X.com".into(), "eve@x.com".into()];
        let snap = merge(ScalarCounts::default(), vec![a, b], "now".into());

        assert_eq!(snap.unique_plex_users, 2);
        assert_eq!(snap.pending_plex_invites, 2);
        assert_eq!(snap.plex_servers[0].user_count, 2);
        assert_eq!(snap.plex_servers[1].pending_invites, 2);
    }

    #[test]
    fn bandwidth_splits_wan_and_decisions() {
        let mut lan = session("a", "One");
        lan.bitrate_kbps = Some(8000);
        lan.location = NetworkLocation::Lan;
        let mut wan = session("b", "Two");
        wan.bitrate_kbps = Some(4500);
        wan.decision = StreamDecision::Transcode;
        let mut unknown = session("c", "Three");
        unknown.bitrate_kbps = None;
        unknown.decision = StreamDecision::DirectStream;

        let stats = bandwidth(&[lan, wan, unknown]);
        assert_eq!(stats.total_kbps, 12_500);
        assert_eq!(stats.wan_kbps, 4500);
        assert_eq!(stats.total_mbps, 12.5);
        assert_eq!(stats.wan_mbps, 4.5);
        assert_eq!(stats.direct_play, 1);
        assert_eq!(stats.transcode, 1);
        assert_eq!(stats.direct_stream, 1);
    }

    #[test]
    fn library_totals_skip_offline_servers() {
        let show = LibraryInfo {
            key: "2".into(),
            title: "TV".into(),
            kind: LibraryKind::Show,
            item_count: 10,
            season_count: Some(30),
            episode_count: Some(300),
            album_count: None,
        };
        let mut a = online(1, "A", Vec::new());
        a.libraries = vec![show.clone()];
        let mut c = ServerState::offline(2, "C", "down");
        c.libraries = vec![show];
        let snap = merge(ScalarCounts::default(), vec![a, c], "now".into());
        assert_eq!(snap.library_totals.shows, 10);
        assert_eq!(snap.library_totals.episodes, 300);
    }

    #[test]
    fn scalar_counts_pass_through() {
        let counts = ScalarCounts {
            total_users: 12,
            pending_requests: 3,
            ..ScalarCounts::default()
        };
        let snap = merge(counts, Vec::new(), "now".into());
        assert_eq!(snap.total_users, 12);
        assert_eq!(snap.pending_requests, 3);
        assert_eq!(snap.plex_servers_online + snap.plex_servers_offline, 0);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn online_plus_offline_equals_servers_queried(
                flags in proptest::collection::vec(any::<bool>(), 0..20)
            ) {
                let states: Vec<ServerState> = flags
                    .iter()
                    .enumerate()
                    .map(|(i, up)| if *up {
                        online(i as i64, &format!("S{i}"), Vec::new())
                    } else {
                        ServerState::offline(i as i64, &format!("S{i}"), "down")
                    })
                    .collect();
                let snap = merge(ScalarCounts::default(), states, "now".into());
                prop_assert_eq!(
                    snap.plex_servers_online + snap.plex_servers_offline,
                    flags.len() as u64
                );
                prop_assert_eq!(snap.plex_servers_online, flags.iter().filter(|f| **f).count() as u64);
            }

            #[test]
            fn unique_viewers_ignore_case(
                names in proptest::collection::vec("[a-z]{1,6}", 1..12)
            ) {
                let sessions: Vec<Session> = names
                    .iter()
                    .enumerate()
                    .map(|(i, n)| {
                        let user = if i % 2 == 0 { n.to_uppercase() } else { n.clone() };
                        session(&user, "T")
                    })
                    .collect();
                let distinct: std::collections::HashSet<_> = names.iter().collect();
                let snap = merge(ScalarCounts::default(), vec![online(1, "A", sessions)], "now".into());
                prop_assert_eq!(snap.unique_live_viewers, distinct.len() as u64);
                prop_assert_eq!(snap.most_popular_content[0].user_count, distinct.len() as u64);
            }
        }
    }
}
