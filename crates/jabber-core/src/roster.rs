//! Contact-list synchronisation into the directory
//!
//! Each roster contact becomes a directory entry under a derived alias. When
//! the derived alias is taken by another address, an existing alias equal to
//! that address's local part is assumed to be auto-derived and may be
//! overwritten. This is a heuristic: a hand-made alias that happens to equal
//! the local part is indistinguishable and will be replaced too.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::directory::Directory;
use crate::validation::{bare_address, domain_part, local_part, validate_address, validate_alias};

/// One contact from the chat connection's roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub address: String,
    pub display_name: Option<String>,
}

impl RosterEntry {
    pub fn new(address: impl Into<String>, display_name: Option<&str>) -> Self {
        Self {
            address: address.into(),
            display_name: display_name.map(str::to_string),
        }
    }
}

/// Outcome counts of a full sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub added: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Outcome counts of an incremental sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalSyncStats {
    pub added: usize,
    pub removed: usize,
    pub errors: usize,
}

enum EntryOutcome {
    Added,
    Skipped,
}

/// Add every roster contact not already in the directory
///
/// Per-entry failures are counted, never propagated. The directory is saved
/// once if anything was added.
pub async fn sync_roster(directory: &Directory, entries: &[RosterEntry]) -> SyncStats {
    let stats = apply_entries(directory, entries).await;
    if stats.added > 0 {
        persist(directory).await;
    }
    stats
}

/// Apply roster additions and removals in one pass
pub async fn sync_roster_incremental(
    directory: &Directory,
    added: &[RosterEntry],
    removed: &[String],
) -> IncrementalSyncStats {
    info!(
        "Starting incremental roster sync: {} added, {} removed",
        added.len(),
        removed.len()
    );

    let add_stats = apply_entries(directory, added).await;
    let mut stats = IncrementalSyncStats {
        added: add_stats.added,
        removed: 0,
        errors: add_stats.errors,
    };

    for address in removed {
        let bare = bare_address(address.trim());
        if bare.is_empty() {
            stats.errors += 1;
            continue;
        }
        let count = directory.remove_address(bare).await;
        if count > 0 {
            info!("Removed {} alias(es) for {}", count, bare);
        }
        stats.removed += count;
    }

    if stats.added > 0 || stats.removed > 0 {
        persist(directory).await;
    }
    stats
}

async fn apply_entries(directory: &Directory, entries: &[RosterEntry]) -> SyncStats {
    let mut stats = SyncStats::default();
    info!("Starting roster sync with {} entries", entries.len());

    for entry in entries {
        match apply_entry(directory, entry).await {
            Ok(EntryOutcome::Added) => stats.added += 1,
            Ok(EntryOutcome::Skipped) => stats.skipped += 1,
            Err(reason) => {
                warn!("Roster entry {} not synced: {}", entry.address, reason);
                stats.errors += 1;
            }
        }
    }

    info!(
        "Roster sync completed: {} added, {} skipped, {} errors",
        stats.added, stats.skipped, stats.errors
    );
    stats
}

async fn apply_entry(directory: &Directory, entry: &RosterEntry) -> Result<EntryOutcome, String> {
    let address = validate_address(&entry.address)
        .map_err(|e| e.to_string())
        .map(|a| bare_address(a).to_lowercase())?;

    let mut alias = derive_alias(&address, entry.display_name.as_deref());
    validate_alias(&alias).map_err(|e| format!("derived alias '{}': {}", alias, e))?;

    if let Some(existing) = directory.get_exact(&alias).await {
        if existing == address {
            debug!("Roster entry already present: {} - {}", alias, address);
            return Ok(EntryOutcome::Skipped);
        }

        let looks_derived = local_part(&existing)
            .is_some_and(|local| local.to_lowercase() == alias);
        if looks_derived {
            info!("Updating auto-derived alias '{}': {} -> {}", alias, existing, address);
        } else {
            let fragment = domain_part(&address)
                .and_then(|d| d.split('.').next())
                .unwrap_or_default();
            let alternative = format!("{}-{}", alias, fragment);
            if directory.get_exact(&alternative).await.is_some() {
                return Err(format!("both '{}' and '{}' are taken", alias, alternative));
            }
            validate_alias(&alternative)
                .map_err(|e| format!("alternative alias '{}': {}", alternative, e))?;
            info!("Using alternative alias '{}' for {}", alternative, address);
            alias = alternative;
        }
    }

    if let Some(existing_alias) = directory.alias_for(&address).await {
        debug!("{} already known as '{}'", address, existing_alias);
        return Ok(EntryOutcome::Skipped);
    }

    match directory.save_alias(&alias, &address).await {
        Ok(true) => {
            info!("Added roster entry: {} - {}", alias, address);
            Ok(EntryOutcome::Added)
        }
        Ok(false) => Ok(EntryOutcome::Skipped),
        Err(e) => Err(e.to_string()),
    }
}

async fn persist(directory: &Directory) {
    if let Err(e) = directory.save().await {
        error!("Failed to save directory after roster sync: {}", e);
    }
}

/// Alias for a contact: the slugged display name, else the sanitized local part
pub fn derive_alias(address: &str, display_name: Option<&str>) -> String {
    display_name
        .map(slugify)
        .filter(|slug| !slug.is_empty())
        .unwrap_or_else(|| sanitize_local_part(address))
}

/// Lower-case ASCII slug with single dashes between words
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Alias-safe rendition of an address's local part
///
/// `+`-prefixed phone numbers become `phone<digits>`. Anything that leaves
/// no letters or digits falls back to `contact-<hash>`.
pub fn sanitize_local_part(address: &str) -> String {
    let local = local_part(address).unwrap_or(address).to_lowercase();

    if local.starts_with('+') {
        let digits: String = local.chars().filter(char::is_ascii_digit).collect();
        if !digits.is_empty() {
            return format!("phone{}", digits);
        }
    }

    let mut sanitized = String::with_capacity(local.len());
    for c in local.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
            c
        } else {
            '-'
        };
        if c == '-' && sanitized.ends_with('-') {
            continue;
        }
        sanitized.push(c);
    }
    let sanitized = sanitized.trim_matches('-');

    if sanitized.chars().any(|c| c.is_ascii_alphanumeric()) {
        sanitized.to_string()
    } else {
        let digest = Uuid::new_v5(&Uuid::NAMESPACE_URL, address.as_bytes()).simple().to_string();
        format!("contact-{}", &digest[..8])
    }
}
