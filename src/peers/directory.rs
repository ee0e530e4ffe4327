use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use crate::state::server_info::ServerInfo;
use crate::utils::config::Config;

pub const SERVERS_FILE: &str = "servers.txt";
/// Written when no servers file exists yet
pub const DEFAULT_SEED_SERVER: &str = "https://candiru.xyz";
const OFFICIAL_DOMAIN: &str = "candiru.xyz";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationLevel {
    #[serde(rename = "candiru-official")]
    Official,
    #[serde(rename = "verified-community-server")]
    Verified,
    #[serde(rename = "unverified")]
    Unverified,
}

/// One known server as shared with clients and kept in the directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerListing {
    pub url: String,
    pub server_info: Option<ServerInfo>,
    pub last_update: f64,
    pub failed_attempts: u32,
    pub last_share: f64,
    pub verification_level: VerificationLevel,
}

impl PeerListing {
    fn new(url: String, verified_domains: &[String]) -> Self {
        let verification_level = verification_level(&url, verified_domains);
        Self {
            url,
            server_info: None,
            last_update: 0.0,
            failed_attempts: 0,
            last_share: 0.0,
            verification_level,
        }
    }
}

pub fn verification_level(url: &str, verified_domains: &[String]) -> VerificationLevel {
    let Some(host) = reqwest::Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_lowercase)) else {
        return VerificationLevel::Unverified;
    };
    let on_domain = |domain: &str| host == domain || host.ends_with(&format!(".{}", domain));
    if on_domain(OFFICIAL_DOMAIN) {
        VerificationLevel::Official
    } else if verified_domains.iter().any(|d| on_domain(d.as_str())) {
        VerificationLevel::Verified
    } else {
        VerificationLevel::Unverified
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoOutcome {
    Added,
    Updated,
    /// New peer refused: the directory is at capacity
    Full,
}

/// Known peer servers plus the update and share work queues.
///
/// Shared between the HTTP handlers (incoming lists, `getServerList`) and the
/// sync task, so everything here takes `&self`.
pub struct PeerDirectory {
    config: Arc<Config>,
    health_secret: String,
    servers_file: PathBuf,
    operational: AtomicBool,
    peers: DashMap<String, PeerListing>,
    /// Failed URL -> time it was dropped
    failed_urls: DashMap<String, f64>,
    update_queue: Mutex<VecDeque<String>>,
    share_queue: Mutex<VecDeque<String>>,
}

fn locked(queue: &Mutex<VecDeque<String>>) -> MutexGuard<'_, VecDeque<String>> {
    queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PeerDirectory {
    pub fn new(config: Arc<Config>) -> Self {
        Self::with_servers_file(config, SERVERS_FILE)
    }

    pub fn with_servers_file(config: Arc<Config>, servers_file: impl Into<PathBuf>) -> Self {
        Self {
            config,
            health_secret: uuid::Uuid::new_v4().to_string(),
            servers_file: servers_file.into(),
            operational: AtomicBool::new(false),
            peers: DashMap::new(),
            failed_urls: DashMap::new(),
            update_queue: Mutex::new(VecDeque::new()),
            share_queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn health_secret(&self) -> &str {
        &self.health_secret
    }

    pub fn self_url(&self) -> &str {
        &self.config.server_url
    }

    pub fn servers_file(&self) -> &Path {
        &self.servers_file
    }

    pub fn is_operational(&self) -> bool {
        self.operational.load(Ordering::Relaxed)
    }

    pub fn set_operational(&self, operational: bool) {
        self.operational.store(operational, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn get(&self, url: &str) -> Option<PeerListing> {
        self.peers.get(url).map(|p| p.value().clone())
    }

    /// Peers with a fetched ServerInfo, ordered by url
    pub fn listings(&self) -> Vec<PeerListing> {
        let mut listings: Vec<PeerListing> = self
            .peers
            .iter()
            .filter(|p| p.server_info.is_some())
            .map(|p| p.value().clone())
            .collect();
        listings.sort_by(|a, b| a.url.cmp(&b.url));
        listings
    }

    pub fn queued_for_update(&self) -> Vec<String> {
        locked(&self.update_queue).iter().cloned().collect()
    }

    pub fn queued_for_share(&self) -> Vec<String> {
        locked(&self.share_queue).iter().cloned().collect()
    }

    fn recently_failed(&self, url: &str, now: f64) -> bool {
        let forget_after = self.config.peer_url_failure_forget_secs as f64;
        self.failed_urls.get(url).is_some_and(|at| now - *at < forget_after)
    }

    /// Queue URLs for a first fetch, skipping self, known peers and recent failures
    fn enqueue_new(&self, urls: impl IntoIterator<Item = String>, now: f64) -> usize {
        let mut queue = locked(&self.update_queue);
        let mut added = 0;
        for url in urls {
            let url = url.trim().trim_end_matches('/').to_string();
            if !url.starts_with("http")
                || url == self.self_url().trim_end_matches('/')
                || self.peers.contains_key(&url)
                || queue.contains(&url)
                || self.recently_failed(&url, now)
            {
                continue;
            }
            queue.push_back(url);
            added += 1;
        }
        added
    }

    /// Merge a list received from another server
    pub fn handle_incoming_servers(&self, urls: Vec<String>, now: f64) -> usize {
        if !self.is_operational() {
            log::debug!("Ignoring shared server list: peer directory not operational");
            return 0;
        }
        let added = self.enqueue_new(urls, now);
        if added > 0 {
            log::info!("Queued {} shared server(s) for discovery", added);
        }
        added
    }

    /// Seed the update queue from the servers file, creating it when missing
    pub async fn load_servers_file(&self, now: f64) -> std::io::Result<usize> {
        let contents = match tokio::fs::read_to_string(&self.servers_file).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No {} found, creating it", self.servers_file.display());
                tokio::fs::write(&self.servers_file, format!("{}\n", DEFAULT_SEED_SERVER)).await?;
                format!("{}\n", DEFAULT_SEED_SERVER)
            }
            Err(e) => return Err(e),
        };
        let urls = contents.lines().map(str::to_string).filter(|l| !l.trim().is_empty());
        let added = self.enqueue_new(urls, now);
        log::info!("Loaded {} server(s) from {}", added, self.servers_file.display());
        Ok(added)
    }

    /// Append a newly discovered URL, keeping only the newest entries
    async fn remember_url(&self, url: &str) -> std::io::Result<()> {
        let contents = match tokio::fs::read_to_string(&self.servers_file).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        let mut lines: VecDeque<String> = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && *l != url)
            .map(str::to_string)
            .collect();
        lines.push_back(url.to_string());
        while lines.len() > self.config.peer_max_servers.max(1) {
            lines.pop_front();
        }
        let mut out = Vec::from(lines).join("\n");
        out.push('\n');
        tokio::fs::write(&self.servers_file, out).await
    }

    /// Next URL due for an info fetch. Fresh peers go back to the end of the queue.
    pub fn next_update_candidate(&self, now: f64) -> Option<String> {
        let mut queue = locked(&self.update_queue);
        let url = queue.pop_front()?;
        let stale_after = self.config.peer_stale_threshold_secs as f64;
        let fresh = self.peers.get(&url).is_some_and(|p| now - p.last_update <= stale_after);
        if fresh {
            queue.push_back(url);
            return None;
        }
        Some(url)
    }

    /// Next known peer due for our list; peers not yet due are requeued
    pub fn next_share_candidate(&self, now: f64) -> Option<String> {
        let mut queue = locked(&self.share_queue);
        let url = queue.pop_front()?;
        let share_every = self.config.peer_share_interval_secs as f64;
        let due = self.peers.get(&url).map(|p| now - p.last_share > share_every)?;
        if due {
            Some(url)
        } else {
            queue.push_back(url);
            None
        }
    }

    /// Store a fetched ServerInfo, adding the peer if it is new
    pub async fn record_info(&self, url: &str, info: ServerInfo, now: f64) -> InfoOutcome {
        if let Some(mut peer) = self.peers.get_mut(url) {
            peer.server_info = Some(info);
            peer.last_update = now;
            peer.failed_attempts = 0;
            return InfoOutcome::Updated;
        }

        if self.peers.len() >= self.config.peer_max_servers {
            log::debug!("Peer directory full, not adding {}", url);
            return InfoOutcome::Full;
        }

        let mut peer = PeerListing::new(url.to_string(), &self.config.peer_verified_domains);
        peer.server_info = Some(info);
        peer.last_update = now;
        log::info!("Added peer {} ({:?})", url, peer.verification_level);
        self.peers.insert(url.to_string(), peer);

        if let Err(e) = self.remember_url(url).await {
            log::warn!("Failed to write {}: {}", self.servers_file.display(), e);
        }
        InfoOutcome::Added
    }

    pub fn record_failure(&self, url: &str, now: f64) {
        if let Some(mut peer) = self.peers.get_mut(url) {
            peer.failed_attempts += 1;
            log::debug!("Peer {} failed ({} attempt(s))", url, peer.failed_attempts);
        } else {
            // never reached: do not retry it until the failure is forgotten
            self.failed_urls.insert(url.to_string(), now);
        }
    }

    pub fn mark_shared(&self, url: &str, now: f64) {
        if let Some(mut peer) = self.peers.get_mut(url) {
            peer.last_share = now;
        }
    }

    /// What we send to `target`: our own URL first, then peers with info, capped
    pub fn share_payload(&self, target: &str) -> Vec<String> {
        let mut urls = vec![self.self_url().to_string()];
        urls.extend(self.listings().into_iter().map(|p| p.url).filter(|url| url != target));
        urls.truncate(self.config.peer_max_servers.max(1));
        urls
    }

    /// Drop failing peers and queue stale or share-due ones. Returns the removed URLs.
    pub fn check_stale_peers(&self, now: f64) -> Vec<String> {
        let max_failed = self.config.peer_max_failed_attempts;
        let stale_after = self.config.peer_stale_threshold_secs as f64;
        let share_every = self.config.peer_share_interval_secs as f64;
        let forget_after = self.config.peer_url_failure_forget_secs as f64;

        let removed: Vec<String> = self
            .peers
            .iter()
            .filter(|p| p.failed_attempts >= max_failed)
            .map(|p| p.key().clone())
            .collect();

        let mut update_queue = locked(&self.update_queue);
        let mut share_queue = locked(&self.share_queue);

        for url in &removed {
            self.peers.remove(url);
            self.failed_urls.insert(url.clone(), now);
            update_queue.retain(|u| u != url);
            share_queue.retain(|u| u != url);
            log::info!("Removed peer {} after {} failed attempts", url, max_failed);
        }
        self.failed_urls.retain(|_, at| now - *at < forget_after);

        for peer in self.peers.iter() {
            if now - peer.last_update > stale_after && !update_queue.contains(&peer.url) {
                update_queue.push_back(peer.url.clone());
            }
            if now - peer.last_share > share_every && !share_queue.contains(&peer.url) {
                share_queue.push_back(peer.url.clone());
            }
        }
        removed
    }
}
