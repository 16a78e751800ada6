/**
 * SERVICE MÉTRIQUES - Ingestion + requêtes tail/hosts
 *
 * RÔLE :
 * Logique métier indépendante du transport HTTP : résolution du propriétaire,
 * validation des batches, écriture dans le store, lectures bornées.
 *
 * CONTRATS :
 * - ingest : batch > max_batch rejeté en entier, sinon un enregistrement par
 *   échantillon, sans rollback si le store échoue en cours de route
 * - tail : les `limit` plus récents de (owner, host), filtrés ts >= since,
 *   renvoyés en ordre croissant
 * - hosts : hosts distincts parmi les `hosts_scan` derniers échantillons
 */

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::identity::{resolve_owner, CallerContext};
use crate::models::{IngestResponse, Sample, StoredSample};
use crate::store::{MetricStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Not authenticated")]
    Unauthenticated,
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Store unavailable: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Taille max d'un batch d'ingestion
    pub max_batch: usize,
    /// Fenêtre de scan pour hosts()
    pub hosts_scan: usize,
    /// Plafond appliqué au limit de tail()
    pub max_tail_limit: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_batch: 25, hosts_scan: 500, max_tail_limit: 1000 }
    }
}

#[derive(Clone)]
pub struct MetricsService {
    store: Arc<dyn MetricStore>,
    limits: Limits,
}

impl MetricsService {
    pub fn new(store: Arc<dyn MetricStore>, limits: Limits) -> Self {
        Self { store, limits }
    }

    pub fn store(&self) -> &Arc<dyn MetricStore> {
        &self.store
    }

    pub fn ingest(
        &self,
        ctx: &CallerContext,
        host: &str,
        samples: Vec<Sample>,
    ) -> Result<IngestResponse, ServiceError> {
        let owner = resolve_owner(ctx)?;
        if samples.len() > self.limits.max_batch {
            return Err(ServiceError::Validation(format!(
                "Too many samples: {} (max {})",
                samples.len(),
                self.limits.max_batch
            )));
        }

        let created_at = now_ms();
        let mut inserted = 0;
        for sample in samples {
            self.store.insert(StoredSample {
                id: Uuid::new_v4().to_string(),
                owner_id: owner.clone(),
                host: host.to_string(),
                created_at,
                sample,
            })?;
            inserted += 1;
        }

        debug!(host, inserted, "batch stored");
        Ok(IngestResponse { inserted })
    }

    pub fn tail(
        &self,
        ctx: &CallerContext,
        host: &str,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<StoredSample>, ServiceError> {
        let owner = resolve_owner(ctx)?;
        let limit = limit.min(self.limits.max_tail_limit);

        // newest-first puis filtre : sinon on perd les plus récents quand limit < fenêtre
        let mut results: Vec<StoredSample> = self
            .store
            .latest_for_host(&owner, host, limit)?
            .into_iter()
            .filter(|r| r.ts() >= since_ms)
            .collect();
        results.sort_by_key(StoredSample::ts);
        Ok(results)
    }

    pub fn hosts(&self, ctx: &CallerContext) -> Result<Vec<String>, ServiceError> {
        let owner = resolve_owner(ctx)?;
        let hosts: BTreeSet<String> = self
            .store
            .latest_for_owner(&owner, self.limits.hosts_scan)?
            .into_iter()
            .map(|r| r.host)
            .collect();
        Ok(hosts.into_iter().collect())
    }
}

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FailingStore, MemoryStore};

    fn service() -> MetricsService {
        MetricsService::new(Arc::new(MemoryStore::new()), Limits::default())
    }

    fn samples(ts: &[i64]) -> Vec<Sample> {
        ts.iter().map(|&t| Sample::at(t)).collect()
    }

    fn ts_of(records: &[StoredSample]) -> Vec<i64> {
        records.iter().map(StoredSample::ts).collect()
    }

    #[test]
    fn accepted_batch_is_fully_visible() {
        let svc = service();
        let alice = CallerContext::user("alice");
        let batch = samples(&(0..25).collect::<Vec<_>>());

        let resp = svc.ingest(&alice, "laptop", batch).unwrap();
        assert_eq!(resp.inserted, 25);
        assert_eq!(svc.tail(&alice, "laptop", 0, 100).unwrap().len(), 25);
    }

    #[test]
    fn oversized_batch_persists_nothing() {
        let svc = service();
        let alice = CallerContext::user("alice");
        let err = svc.ingest(&alice, "laptop", samples(&[1; 26])).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert_eq!(svc.store().len(), 0);
    }

    #[test]
    fn store_failure_keeps_earlier_inserts() {
        let svc = MetricsService::new(Arc::new(FailingStore::new(3)), Limits::default());
        let alice = CallerContext::user("alice");

        let err = svc.ingest(&alice, "h", samples(&[10, 20, 30, 40, 50])).unwrap_err();
        assert!(matches!(err, ServiceError::Store(_)));
        // pas de rollback : les deux premiers restent
        assert_eq!(ts_of(&svc.tail(&alice, "h", 0, 10).unwrap()), vec![10, 20]);
        assert_eq!(svc.store().len(), 2);
    }

    #[test]
    fn empty_batch_is_accepted() {
        let svc = service();
        let resp = svc.ingest(&CallerContext::session("s"), "h", Vec::new()).unwrap();
        assert_eq!(resp.inserted, 0);
    }

    #[test]
    fn every_operation_requires_identity() {
        let svc = service();
        let nobody = CallerContext::anonymous();
        assert!(matches!(svc.ingest(&nobody, "h", samples(&[1])), Err(ServiceError::Unauthenticated)));
        assert!(matches!(svc.tail(&nobody, "h", 0, 10), Err(ServiceError::Unauthenticated)));
        assert!(matches!(svc.hosts(&nobody), Err(ServiceError::Unauthenticated)));
        assert_eq!(svc.store().len(), 0);
    }

    #[test]
    fn unauthenticated_wins_over_validation() {
        let svc = service();
        let err = svc.ingest(&CallerContext::anonymous(), "h", samples(&[1; 30])).unwrap_err();
        assert!(matches!(err, ServiceError::Unauthenticated));
    }

    #[test]
    fn owners_are_isolated() {
        let svc = service();
        let alice = CallerContext::user("alice");
        let bob = CallerContext::session("bob-session");
        svc.ingest(&alice, "shared", samples(&[10, 20])).unwrap();

        assert!(svc.tail(&bob, "shared", 0, 10).unwrap().is_empty());
        assert!(svc.hosts(&bob).unwrap().is_empty());
        assert_eq!(svc.hosts(&alice).unwrap(), vec!["shared"]);
    }

    #[test]
    fn tail_filters_and_sorts_ascending() {
        let svc = service();
        let alice = CallerContext::user("alice");
        svc.ingest(&alice, "h", samples(&[100, 300, 200, 500, 400])).unwrap();

        let got = svc.tail(&alice, "h", 150, 10).unwrap();
        assert_eq!(ts_of(&got), vec![200, 300, 400, 500]);
    }

    #[test]
    fn tail_limit_keeps_most_recent() {
        let svc = service();
        let alice = CallerContext::user("alice");
        let ts: Vec<i64> = (0..10).map(|i| i * 100).collect();
        svc.ingest(&alice, "h", samples(&ts)).unwrap();

        let got = svc.tail(&alice, "h", 0, 3).unwrap();
        assert_eq!(ts_of(&got), vec![700, 800, 900]);
    }

    #[test]
    fn tail_limit_is_clamped() {
        let store = Arc::new(MemoryStore::new());
        let svc = MetricsService::new(store, Limits { max_tail_limit: 2, ..Limits::default() });
        let alice = CallerContext::user("alice");
        svc.ingest(&alice, "h", samples(&[1, 2, 3])).unwrap();
        assert_eq!(ts_of(&svc.tail(&alice, "h", 0, 50).unwrap()), vec![2, 3]);
        assert!(svc.tail(&alice, "h", 0, 0).unwrap().is_empty());
    }

    #[test]
    fn hosts_are_sorted_and_unique() {
        let svc = service();
        let alice = CallerContext::user("alice");
        for host in ["b", "a", "a"] {
            svc.ingest(&alice, host, samples(&[1])).unwrap();
        }
        assert_eq!(svc.hosts(&alice).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn stale_host_drops_out_of_recent_window() {
        let store = Arc::new(MemoryStore::new());
        let svc = MetricsService::new(store, Limits { hosts_scan: 3, ..Limits::default() });
        let alice = CallerContext::user("alice");
        svc.ingest(&alice, "old", samples(&[1])).unwrap();
        svc.ingest(&alice, "new", samples(&[2, 3, 4])).unwrap();

        assert_eq!(svc.hosts(&alice).unwrap(), vec!["new"]);
        // l'historique reste accessible via tail
        assert_eq!(svc.tail(&alice, "old", 0, 10).unwrap().len(), 1);
    }

    #[test]
    fn reads_are_idempotent() {
        let svc = service();
        let alice = CallerContext::user("alice");
        svc.ingest(&alice, "h", samples(&[5, 1, 3])).unwrap();

        assert_eq!(svc.tail(&alice, "h", 0, 10).unwrap(), svc.tail(&alice, "h", 0, 10).unwrap());
        assert_eq!(svc.hosts(&alice).unwrap(), svc.hosts(&alice).unwrap());
    }

    #[test]
    fn fields_round_trip_unchanged() {
        let svc = service();
        let alice = CallerContext::user("alice");
        let mut sample = Sample::at(1_700_000_000_000);
        sample.cpu_score = Some(123_456.0);
        sample.mem_total = Some(8.0 * 1024.0 * 1024.0 * 1024.0);
        sample.net_rtt = Some(0.0);
        svc.ingest(&alice, "h", vec![sample.clone()]).unwrap();

        let got = svc.tail(&alice, "h", sample.ts, 1).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].sample, sample);
        assert_eq!(got[0].sample.mem_used, None);
        assert_eq!(got[0].owner_id, "alice");
    }
}
