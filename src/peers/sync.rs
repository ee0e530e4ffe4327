use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use crate::peers::directory::{InfoOutcome, PeerDirectory};
use crate::peers::HEALTH_SECRET_HEADER;
use crate::state::server_info::ServerInfo;
use crate::tick::unix_now;
use crate::utils::config::Config;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// Talks to other servers on the directory's behalf. Runs on its own task,
/// fully apart from the game loop.
pub struct PeerSync {
    directory: Arc<PeerDirectory>,
    config: Arc<Config>,
    client: reqwest::Client,
}

impl PeerSync {
    pub fn new(directory: Arc<PeerDirectory>, config: Arc<Config>) -> Result<Self, PeerError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { directory, config, client })
    }

    /// Confirm our own public URL reaches this process before joining the network
    pub async fn self_healthcheck(&self) -> bool {
        let url = endpoint(&self.config.server_url, "/api/healthcheck");
        let retries = self.config.peer_healthcheck_retries.max(1);
        let wait = Duration::from_secs(self.config.peer_healthcheck_interval_secs);

        for attempt in 1..=retries {
            let result = self
                .client
                .get(&url)
                .header(HEALTH_SECRET_HEADER, self.directory.health_secret())
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {
                    log::info!("Healthcheck of {} passed", url);
                    return true;
                }
                Ok(response) => log::warn!("Healthcheck {}/{} of {}: status {}", attempt, retries, url, response.status()),
                Err(e) => log::warn!("Healthcheck {}/{} of {} failed: {}", attempt, retries, url, e),
            }
            if attempt < retries {
                sleep(wait).await;
            }
        }
        false
    }

    pub async fn fetch_info(&self, url: &str) -> Result<ServerInfo, PeerError> {
        let response = self.client.get(endpoint(url, "/api/getInfo")).send().await?;
        if !response.status().is_success() {
            return Err(PeerError::Status(response.status().as_u16()));
        }
        Ok(response.json::<ServerInfo>().await?)
    }

    pub async fn share_with(&self, url: &str, urls: &[String]) -> Result<(), PeerError> {
        let response = self
            .client
            .post(endpoint(url, "/api/shareServerList"))
            .json(urls)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PeerError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    pub async fn process_update_queue_item(&self) {
        let now = unix_now();
        let Some(url) = self.directory.next_update_candidate(now) else {
            return;
        };
        match self.fetch_info(&url).await {
            Ok(info) => {
                if self.directory.record_info(&url, info, unix_now()).await == InfoOutcome::Full {
                    log::debug!("Skipped {}: directory full", url);
                }
            }
            Err(e) => {
                log::debug!("Fetching info from {} failed: {}", url, e);
                self.directory.record_failure(&url, unix_now());
            }
        }
    }

    pub async fn process_share_queue_item(&self) {
        let Some(url) = self.directory.next_share_candidate(unix_now()) else {
            return;
        };
        let payload = self.directory.share_payload(&url);
        match self.share_with(&url, &payload).await {
            Ok(()) => {
                log::debug!("Shared {} server(s) with {}", payload.len(), url);
                self.directory.mark_shared(&url, unix_now());
            }
            Err(e) => {
                log::debug!("Sharing with {} failed: {}", url, e);
                self.directory.record_failure(&url, unix_now());
            }
        }
    }

    /// Healthcheck, seed from disk, then step both queues forever
    pub async fn run(self) {
        if !self.self_healthcheck().await {
            log::error!(
                "Healthcheck of {} never passed; peer discovery disabled",
                self.config.server_url
            );
            return;
        }
        self.directory.set_operational(true);

        if let Err(e) = self.directory.load_servers_file(unix_now()).await {
            log::warn!("Failed to read {}: {}", self.directory.servers_file().display(), e);
        }

        let mut ticker = interval(Duration::from_secs(self.config.peer_update_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.directory.check_stale_peers(unix_now());
            self.process_update_queue_item().await;
            self.process_share_queue_item().await;
        }
    }
}

pub fn spawn_peer_sync(directory: Arc<PeerDirectory>, config: Arc<Config>) -> Option<tokio::task::JoinHandle<()>> {
    match PeerSync::new(directory, config) {
        Ok(sync) => Some(tokio::spawn(sync.run())),
        Err(e) => {
            log::error!("Failed to build peer HTTP client: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_join() {
        assert_eq!(endpoint("https://a.example/", "/api/getInfo"), "https://a.example/api/getInfo");
        assert_eq!(endpoint("https://a.example", "/api/healthcheck"), "https://a.example/api/healthcheck");
    }

    #[tokio::test]
    async fn test_unreachable_peer_counts_as_failure() {
        let config = Arc::new(Config {
            peer_max_failed_attempts: 1,
            ..Config::default()
        });
        let path = std::env::temp_dir().join(format!("arenaserver-sync-{}.txt", uuid::Uuid::new_v4()));
        let directory = Arc::new(PeerDirectory::with_servers_file(config.clone(), path));
        directory.set_operational(true);
        // nothing listens on port 9 locally
        directory.handle_incoming_servers(vec!["http://127.0.0.1:9".to_string()], unix_now());

        let sync = PeerSync::new(directory.clone(), config).unwrap();
        sync.process_update_queue_item().await;

        assert!(directory.is_empty());
        assert!(directory.queued_for_update().is_empty());
        assert_eq!(directory.handle_incoming_servers(vec!["http://127.0.0.1:9".to_string()], unix_now()), 0);
    }
}
