//! Typed projections over the RxNav REST endpoints.
//!
//! The cache stores payloads as opaque text; these methods parse only the
//! fields each operation needs, tolerating absent sections with
//! `#[serde(default)]` the way the service omits empty groups.

use crate::client::RxnavClient;
use crate::transport::Transport;
use common::{CodeStatus, ConceptHistory, Error, Result, Rxcui};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

// ── Response shapes ───────────────────────────────────────────────────

/// `/rxcuihistory/status.json?type=S`
#[derive(Debug, Default, Deserialize)]
pub struct StatusListResponse {
    #[serde(rename = "rxcuiList", default)]
    pub rxcui_list: RxcuiList,
}

#[derive(Debug, Default, Deserialize)]
pub struct RxcuiList {
    #[serde(default)]
    pub rxcuis: Vec<String>,
}

/// `/rxcui/{rxcui}/allrelated.json`
#[derive(Debug, Default, Deserialize)]
pub struct AllRelatedResponse {
    #[serde(rename = "allRelatedGroup", default)]
    pub all_related_group: Option<AllRelatedGroup>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AllRelatedGroup {
    #[serde(rename = "conceptGroup", default)]
    pub concept_group: Vec<ConceptGroup>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConceptGroup {
    #[serde(default)]
    pub tty: String,
    #[serde(rename = "conceptProperties", default)]
    pub concept_properties: Vec<ConceptProperty>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConceptProperty {
    #[serde(default)]
    pub rxcui: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tty: String,
}

/// `/rxcuihistory/concept.json?rxcui=N`
#[derive(Debug, Default, Deserialize)]
struct HistoryResponse {
    #[serde(rename = "rxcuiHistoryConcept", default)]
    concept: Option<HistoryConcept>,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryConcept {
    #[serde(rename = "rxcuiConcept", default)]
    rxcui_concept: Option<HistoryAttributes>,
    #[serde(rename = "bossConcept", default)]
    boss_concept: Vec<BossConcept>,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryAttributes {
    #[serde(default)]
    rxcui: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    tty: String,
    #[serde(rename = "str", default)]
    name: String,
    #[serde(rename = "startDate", default)]
    start_date: String,
    #[serde(rename = "endDate", default)]
    end_date: String,
    #[serde(rename = "scdRxcui", default)]
    scd_rxcui: String,
}

#[derive(Debug, Default, Deserialize)]
struct BossConcept {
    #[serde(rename = "bossRxcui", default)]
    boss_rxcui: String,
}

/// `/rxcui/{rxcui}/allhistoricalndcs/json`
#[derive(Debug, Default, Deserialize)]
struct NdcHistoryResponse {
    #[serde(rename = "historicalNdcConcept", default)]
    concept: Option<NdcConcept>,
}

#[derive(Debug, Default, Deserialize)]
struct NdcConcept {
    #[serde(rename = "historicalNdcTime", default)]
    ndc_time_groups: Vec<NdcTimeGroup>,
}

#[derive(Debug, Default, Deserialize)]
struct NdcTimeGroup {
    #[serde(rename = "ndcTime", default)]
    ndc_time: Vec<NdcTime>,
}

#[derive(Debug, Default, Deserialize)]
struct NdcTime {
    #[serde(default)]
    ndc: Vec<String>,
}

/// `/rxclass/classTree/json?classId=X`
#[derive(Debug, Default, Deserialize)]
pub struct ClassTreeResponse {
    #[serde(rename = "rxclassTree", default)]
    pub tree: Vec<ClassTreeNode>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClassTreeNode {
    #[serde(rename = "rxclassMinConceptItem", default)]
    pub concept: ClassConcept,
    #[serde(rename = "rxclassTree", default)]
    pub children: Vec<ClassTreeNode>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClassConcept {
    #[serde(rename = "classId", default)]
    pub class_id: String,
    #[serde(rename = "className", default)]
    pub class_name: String,
}

/// `/rxclass/classMembers.json?classId=X&...`
#[derive(Debug, Default, Deserialize)]
struct ClassMembersResponse {
    #[serde(rename = "drugMemberGroup", default)]
    drug_member_group: Option<DrugMemberGroup>,
}

#[derive(Debug, Default, Deserialize)]
struct DrugMemberGroup {
    #[serde(rename = "drugMember", default)]
    drug_member: Vec<DrugMember>,
}

#[derive(Debug, Default, Deserialize)]
struct DrugMember {
    #[serde(rename = "minConcept", default)]
    min_concept: MinConcept,
}

#[derive(Debug, Default, Deserialize)]
struct MinConcept {
    #[serde(default)]
    rxcui: String,
}

fn parse_rxcui(raw: &str, url: &str) -> Result<Rxcui> {
    raw.trim().parse::<Rxcui>().map_err(|_| Error::Malformed {
        url: url.to_string(),
        reason: format!("non-numeric rxcui [{raw}]"),
    })
}

fn opt_rxcui(raw: &str) -> Option<Rxcui> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        trimmed.parse::<Rxcui>().ok()
    }
}

// ── Endpoint methods ──────────────────────────────────────────────────

impl<T: Transport> RxnavClient<T> {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Enumerate every code carrying one status category.
    pub async fn codes_with_status(&mut self, status: CodeStatus) -> Result<BTreeSet<Rxcui>> {
        let url = self.url(&format!(
            "/rxcuihistory/status.json?type={}",
            status.query_value()
        ));
        let raw = self.get_raw(&url).await?;
        let body: StatusListResponse = serde_json::from_str(&raw)?;
        let mut codes = BTreeSet::new();
        for raw_code in &body.rxcui_list.rxcuis {
            codes.insert(parse_rxcui(raw_code, &url)?);
        }
        Ok(codes)
    }

    /// Enumerate the union of several status categories, recording which
    /// category each code came from.
    pub async fn enumerate_codes(
        &mut self,
        statuses: &[CodeStatus],
    ) -> Result<(BTreeSet<Rxcui>, HashMap<Rxcui, CodeStatus>)> {
        let mut universe = BTreeSet::new();
        let mut status_of = HashMap::new();
        for &status in statuses {
            let codes = self.codes_with_status(status).await?;
            let before = universe.len();
            for &code in &codes {
                status_of.insert(code, status);
            }
            universe.extend(codes.iter().copied());
            debug!(
                %status,
                count = codes.len(),
                delta = universe.len() - before,
                total = universe.len(),
                "enumerated status category"
            );
        }
        Ok((universe, status_of))
    }

    /// All related concepts of a code, grouped by term type.
    pub async fn all_related(&mut self, rxcui: Rxcui) -> Result<AllRelatedResponse> {
        let url = self.url(&format!("/rxcui/{rxcui}/allrelated.json"));
        let raw = self.get_raw(&url).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Related codes restricted to the given term types.
    pub async fn related_codes_with_tty(
        &mut self,
        rxcui: Rxcui,
        ttys: &[&str],
    ) -> Result<Vec<Rxcui>> {
        let url = self.url(&format!("/rxcui/{rxcui}/allrelated.json"));
        let related = self.all_related(rxcui).await?;
        let mut codes = Vec::new();
        let Some(group) = related.all_related_group else {
            return Ok(codes);
        };
        for concept_group in &group.concept_group {
            if !ttys.contains(&concept_group.tty.as_str()) {
                continue;
            }
            for prop in &concept_group.concept_properties {
                codes.push(parse_rxcui(&prop.rxcui, &url)?);
            }
        }
        Ok(codes)
    }

    /// Historical record for a code, if the service knows it.
    pub async fn concept_history(&mut self, rxcui: Rxcui) -> Result<Option<ConceptHistory>> {
        let url = self.url(&format!("/rxcuihistory/concept.json?rxcui={rxcui}"));
        let raw = self.get_raw(&url).await?;
        let body: HistoryResponse = serde_json::from_str(&raw)?;
        let Some(concept) = body.concept else {
            return Ok(None);
        };
        let Some(attrs) = concept.rxcui_concept else {
            return Ok(None);
        };
        let boss_rxcuis = concept
            .boss_concept
            .iter()
            .filter_map(|b| opt_rxcui(&b.boss_rxcui))
            .collect();
        Ok(Some(ConceptHistory {
            rxcui: opt_rxcui(&attrs.rxcui).unwrap_or(rxcui),
            name: attrs.name,
            tty: attrs.tty,
            status: attrs.status,
            start_date: attrs.start_date,
            end_date: attrs.end_date,
            scd_rxcui: opt_rxcui(&attrs.scd_rxcui),
            boss_rxcuis,
        }))
    }

    /// Flattened set of NDC package codes historically tied to a drug code.
    pub async fn ndc_codes_for(&mut self, rxcui: Rxcui) -> Result<BTreeSet<String>> {
        let url = self.url(&format!("/rxcui/{rxcui}/allhistoricalndcs/json"));
        let raw = self.get_raw(&url).await?;
        let body: NdcHistoryResponse = serde_json::from_str(&raw)?;
        let mut ndcs = BTreeSet::new();
        if let Some(concept) = body.concept {
            for group in &concept.ndc_time_groups {
                for time in &group.ndc_time {
                    for ndc in &time.ndc {
                        ndcs.insert(ndc.clone());
                    }
                }
            }
        }
        Ok(ndcs)
    }

    /// Class hierarchy rooted at `class_id`.
    pub async fn class_tree(&mut self, class_id: &str) -> Result<ClassTreeResponse> {
        let url = self.url(&format!("/rxclass/classTree/json?classId={class_id}"));
        let raw = self.get_raw(&url).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Generic drug members of one class.
    pub async fn class_members(&mut self, class_id: &str) -> Result<Vec<Rxcui>> {
        let url = self.url(&format!(
            "/rxclass/classMembers.json?classId={class_id}&relaSource=VA&rela=has_VAClass&ttys=SCD+GPCK"
        ));
        let raw = self.get_raw(&url).await?;
        let body: ClassMembersResponse = serde_json::from_str(&raw)?;
        let mut codes = Vec::new();
        if let Some(group) = body.drug_member_group {
            for member in &group.drug_member {
                codes.push(parse_rxcui(&member.min_concept.rxcui, &url)?);
            }
        }
        Ok(codes)
    }
}

#[cfg(test)]
mod tests {
    use crate::client::test_transport::MapTransport;
    use crate::client::{RetryPolicy, RxnavClient};
    use common::CodeStatus;
    use std::time::Duration;

    const BASE: &str = "https://example.test/REST";

    fn client_with(entries: &[(&str, &str)]) -> RxnavClient<MapTransport> {
        RxnavClient::new(MapTransport::new(entries), BASE).with_retry(RetryPolicy {
            max_attempts: 1,
            delay: Duration::ZERO,
        })
    }

    #[tokio::test]
    async fn test_codes_with_status_parses_integers() {
        let mut client = client_with(&[(
            "https://example.test/REST/rxcuihistory/status.json?type=ACTIVE",
            r#"{"rxcuiList": {"rxcuis": ["211", "292", "1049214"]}}"#,
        )]);
        let codes = client.codes_with_status(CodeStatus::Active).await.unwrap();
        assert_eq!(codes.into_iter().collect::<Vec<_>>(), vec![211, 292, 1049214]);
    }

    #[tokio::test]
    async fn test_enumerate_codes_records_status_per_code() {
        let mut client = client_with(&[
            (
                "https://example.test/REST/rxcuihistory/status.json?type=ACTIVE",
                r#"{"rxcuiList": {"rxcuis": ["211"]}}"#,
            ),
            (
                "https://example.test/REST/rxcuihistory/status.json?type=RETIRED",
                r#"{"rxcuiList": {"rxcuis": ["991041"]}}"#,
            ),
        ]);
        let (universe, status_of) = client
            .enumerate_codes(&[CodeStatus::Active, CodeStatus::Retired])
            .await
            .unwrap();
        assert_eq!(universe.len(), 2);
        assert_eq!(status_of[&211], CodeStatus::Active);
        assert_eq!(status_of[&991041], CodeStatus::Retired);
    }

    #[tokio::test]
    async fn test_related_codes_filtered_by_tty() {
        let body = r#"{"allRelatedGroup": {"rxcui": "1049214", "conceptGroup": [
            {"tty": "BN", "conceptProperties": [{"rxcui": "216903", "name": "Endocet", "tty": "BN"}]},
            {"tty": "IN", "conceptProperties": [{"rxcui": "161", "name": "Acetaminophen", "tty": "IN"}]},
            {"tty": "PIN"}
        ]}}"#;
        let mut client = client_with(&[(
            "https://example.test/REST/rxcui/1049214/allrelated.json",
            body,
        )]);
        let codes = client
            .related_codes_with_tty(1049214, &["IN", "PIN"])
            .await
            .unwrap();
        assert_eq!(codes, vec![161]);
    }

    #[tokio::test]
    async fn test_concept_history_projection() {
        let body = r#"{"rxcuiHistoryConcept": {
            "rxcuiConcept": {
                "status": "Retired", "rxcui": "991041", "tty": "SBD",
                "str": "Chlorpromazine hydrochloride 10 MG Oral Tablet [Thorazine]",
                "startDate": "062010", "endDate": "022013",
                "scdRxcui": "991039"
            },
            "bossConcept": [
                {"bossRxcui": "104728"},
                {"bossRxcui": ""}
            ]
        }}"#;
        let mut client = client_with(&[(
            "https://example.test/REST/rxcuihistory/concept.json?rxcui=991041",
            body,
        )]);
        let history = client.concept_history(991041).await.unwrap().unwrap();
        assert_eq!(history.tty, "SBD");
        assert_eq!(history.status, "Retired");
        assert_eq!(history.scd_rxcui, Some(991039));
        assert_eq!(history.boss_rxcuis, vec![104728]);
        assert!(history.is_drug());
    }

    #[tokio::test]
    async fn test_concept_history_absent_is_none() {
        let mut client = client_with(&[(
            "https://example.test/REST/rxcuihistory/concept.json?rxcui=5",
            "{}",
        )]);
        assert!(client.concept_history(5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ndc_codes_flattened_and_deduplicated() {
        let body = r#"{"historicalNdcConcept": {"historicalNdcTime": [
            {"ndcTime": [{"ndc": ["00093015401", "00093015410"]}, {"ndc": ["00093015401"]}]},
            {"ndcTime": [{"ndc": ["58016062296"]}]}
        ]}}"#;
        let mut client = client_with(&[(
            "https://example.test/REST/rxcui/7/allhistoricalndcs/json",
            body,
        )]);
        let ndcs = client.ndc_codes_for(7).await.unwrap();
        assert_eq!(ndcs.len(), 3);
        assert!(ndcs.contains("58016062296"));
    }

    #[tokio::test]
    async fn test_ndc_codes_empty_when_concept_null() {
        let mut client = client_with(&[(
            "https://example.test/REST/rxcui/8/allhistoricalndcs/json",
            r#"{"historicalNdcConcept": null}"#,
        )]);
        assert!(client.ndc_codes_for(8).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_class_tree_and_members() {
        let tree_body = r#"{"rxclassTree": [
            {"rxclassMinConceptItem": {"classId": "VA000", "className": "VA Classes"},
             "rxclassTree": [
                {"rxclassMinConceptItem": {"classId": "AD000", "className": "Antidotes"}}
             ]}
        ]}"#;
        let members_body = r#"{"drugMemberGroup": {"drugMember": [
            {"minConcept": {"rxcui": "197806"}},
            {"minConcept": {"rxcui": "856834"}}
        ]}}"#;
        let mut client = client_with(&[
            (
                "https://example.test/REST/rxclass/classTree/json?classId=VA000",
                tree_body,
            ),
            (
                "https://example.test/REST/rxclass/classMembers.json?classId=AD000&relaSource=VA&rela=has_VAClass&ttys=SCD+GPCK",
                members_body,
            ),
        ]);
        let tree = client.class_tree("VA000").await.unwrap();
        assert_eq!(tree.tree.len(), 1);
        assert_eq!(tree.tree[0].children[0].concept.class_id, "AD000");

        let members = client.class_members("AD000").await.unwrap();
        assert_eq!(members, vec![197806, 856834]);
    }
}
