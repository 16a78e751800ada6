use serde::{Deserialize, Serialize};

/// Échantillon tel qu'envoyé par l'agent.
/// Champ absent = "pas mesuré à ce tick", jamais 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_used: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_used: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_downlink: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_rtt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_ping_ms: Option<f64>,
}

#[cfg(test)]
impl Sample {
    /// Échantillon vide (ts seul)
    pub fn at(ts: i64) -> Self {
        Self {
            ts,
            cpu_score: None,
            cpu_cores: None,
            mem_used: None,
            mem_total: None,
            disk_used: None,
            disk_total: None,
            net_downlink: None,
            net_rtt: None,
            net_ping_ms: None,
        }
    }
}

/// Enregistrement persisté : immuable une fois écrit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSample {
    pub id: String,
    pub owner_id: String,
    pub host: String,
    pub created_at: i64, // horodatage serveur, informatif seulement
    #[serde(flatten)]
    pub sample: Sample,
}

impl StoredSample {
    pub fn ts(&self) -> i64 {
        self.sample.ts
    }
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub host: String,
    pub samples: Vec<Sample>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct IngestResponse {
    pub inserted: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TailParams {
    pub host: String,
    pub since_ms: i64,
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_fields_stay_absent() {
        let s: Sample = serde_json::from_str(r#"{"ts":10,"cpuScore":0}"#).unwrap();
        assert_eq!(s.cpu_score, Some(0.0));
        assert_eq!(s.mem_used, None);

        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json, serde_json::json!({"ts": 10, "cpuScore": 0.0}));
    }

    #[test]
    fn stored_sample_flattens_metrics() {
        let mut sample = Sample::at(42);
        sample.net_ping_ms = Some(12.5);
        let stored = StoredSample {
            id: "x".into(),
            owner_id: "u1".into(),
            host: "box".into(),
            created_at: 1,
            sample,
        };
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["ownerId"], "u1");
        assert_eq!(json["ts"], 42);
        assert_eq!(json["netPingMs"], 12.5);
        assert!(json.get("cpuScore").is_none());

        let back: StoredSample = serde_json::from_value(json).unwrap();
        assert_eq!(back, stored);
    }
}
