//! Library sections and their item counts.
//!
//! Counts use zero-size pages: the server reports `totalSize` without
//! returning any items. Every count has its own timeout and degrades to
//! zero on failure.

use futures::future::join_all;
use serde_json::Value;

use streamdash_core::payload::{NumericField, as_list, str_field};
use streamdash_core::snapshot::{LibraryInfo, LibraryKind};

use crate::client::ServerClient;
use crate::error::FetchError;

/// Plex metadata type ids used for nested counts.
const TYPE_SEASON: u32 = 3;
const TYPE_EPISODE: u32 = 4;
const TYPE_ALBUM: u32 = 9;

/// A library section before its counts are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub key: String,
    pub title: String,
    pub kind: LibraryKind,
}

/// List sections, then count every section in parallel. A failing
/// section listing yields no libraries.
pub async fn fetch_libraries(
    client: &ServerClient,
    server_name: &str,
    base: &str,
    token: &str,
) -> Vec<LibraryInfo> {
    let payload = match client
        .get_json(base, "/library/sections", token, &[], client.config().library_timeout())
        .await
    {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(server = %server_name, error = %e, "Failed to list library sections");
            return Vec::new();
        },
    };
    let sections = parse_sections(&payload);
    join_all(
        sections
            .into_iter()
            .map(|section| count_section(client, server_name, base, token, section)),
    )
    .await
}

pub fn parse_sections(payload: &Value) -> Vec<Section> {
    let container = payload.get("MediaContainer").unwrap_or(payload);
    as_list(container.get("Directory"))
        .into_iter()
        .filter_map(|dir| {
            let key = str_field(dir, "key")?.into_owned();
            let title = str_field(dir, "title")
                .map(|t| t.into_owned())
                .unwrap_or_else(|| format!("Library {key}"));
            let kind = str_field(dir, "type")
                .map(|t| LibraryKind::from_section_type(&t))
                .unwrap_or(LibraryKind::Other);
            Some(Section { key, title, kind })
        })
        .collect()
}

async fn count_section(
    client: &ServerClient,
    server_name: &str,
    base: &str,
    token: &str,
    section: Section,
) -> LibraryInfo {
    let count = |kind: Option<u32>| {
        let key = section.key.clone();
        async move {
            match total_size(client, base, token, &key, kind).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(
                        server = %server_name,
                        section = %key,
                        kind,
                        error = %e,
                        "Library count failed, using 0"
                    );
                    0
                },
            }
        }
    };

    let mut info = LibraryInfo {
        key: section.key.clone(),
        title: section.title.clone(),
        kind: section.kind,
        item_count: 0,
        season_count: None,
        episode_count: None,
        album_count: None,
    };
    match section.kind {
        LibraryKind::Show => {
            let (items, seasons, episodes) =
                tokio::join!(count(None), count(Some(TYPE_SEASON)), count(Some(TYPE_EPISODE)));
            info.item_count = items;
            info.season_count = Some(seasons);
            info.episode_count = Some(episodes);
        },
        LibraryKind::Artist => {
            let (items, albums) = tokio::join!(count(None), count(Some(TYPE_ALBUM)));
            info.item_count = items;
            info.album_count = Some(albums);
        },
        _ => info.item_count = count(None).await,
    }
    info
}

async fn total_size(
    client: &ServerClient,
    base: &str,
    token: &str,
    key: &str,
    kind: Option<u32>,
) -> Result<u64, FetchError> {
    let mut query = vec![
        ("X-Plex-Container-Start", "0".to_string()),
        ("X-Plex-Container-Size", "0".to_string()),
    ];
    if let Some(kind) = kind {
        query.push(("type", kind.to_string()));
    }
    let path = format!("/library/sections/{key}/all");
    let payload = client
        .get_json(base, &path, token, &query, client.config().library_timeout())
        .await?;
    parse_total_size(&payload)
}

/// Read `totalSize`, falling back to `size` for servers that omit it.
pub fn parse_total_size(payload: &Value) -> Result<u64, FetchError> {
    let container = payload.get("MediaContainer").unwrap_or(payload);
    NumericField::field(container, "totalSize")
        .as_u64()
        .or_else(|| NumericField::field(container, "size").as_u64())
        .ok_or_else(|| FetchError::Payload("container has no totalSize".to_string()))
}
