//! Verification stage.
//!
//! Cross-checks the specialists' claims against the transcript. The
//! reasoning service re-examines evidence and scores confidence, but the
//! accept/veto verdict itself is applied locally: claims at or above the
//! cutoff are verified, the rest are vetoed, and a claim with too few
//! corroborating instances has its confidence floored first. That keeps
//! the decision rule auditable regardless of which backend produced the
//! scores.

use serde::Deserialize;

use crate::config::AnalysisConfig;
use crate::error::PipelineError;
use crate::models::{
    ChronicleFindings, DynamicsFindings, GottmanFindings, Timeline, TriageFindings,
    VerifiedClaim, VerifierFindings,
};
use crate::reasoning::{ReasoningProvider, StageRequest};
use crate::stages::{decode_or_default, format_transcript};

pub const STAGE: &str = "verifier";

/// Confidence assigned to under-evidenced claims before the veto check.
const LOW_EVIDENCE_CONFIDENCE: u32 = 40;

const SYSTEM: &str = "You are an auditor reviewing analytical claims about a two-party \
message history. For each claim, re-read the cited evidence in the transcript, count the \
independent instances that support it, and score your confidence from 0 to 100. Do not \
decide acceptance; report claim, agent, evidence, confidence, and instances. Respond with \
a single JSON object.";

#[derive(Debug, Default, Deserialize)]
struct VerifierResponse {
    #[serde(default)]
    claims: Vec<VerifiedClaim>,
    #[serde(default)]
    methodology_notes: Vec<String>,
}

pub async fn verify(
    provider: &dyn ReasoningProvider,
    triage: &TriageFindings,
    gottman: &GottmanFindings,
    dynamics: &DynamicsFindings,
    chronicle: &ChronicleFindings,
    timeline: &Timeline,
    config: &AnalysisConfig,
) -> Result<VerifierFindings, PipelineError> {
    let candidates = candidate_claims(triage, gottman, dynamics, chronicle);

    let prompt = format!(
        "Claims under review:\n{}\n\nTranscript:\n\n{}\n\n\
         Return JSON: {{\"claims\": [{{\"claim\", \"agent\", \"evidence\", \"confidence\" \
         (0-100), \"instances\"}}], \"methodology_notes\": [\"...\"]}}.",
        serde_json::to_string_pretty(&candidates).unwrap_or_default(),
        format_transcript(&timeline.messages)
    );

    let value = provider
        .invoke(&StageRequest {
            stage: STAGE,
            system: SYSTEM.to_string(),
            prompt,
        })
        .await?;

    let resp: VerifierResponse = decode_or_default(STAGE, value);
    let claims = if resp.claims.is_empty() {
        candidates
    } else {
        resp.claims
    };

    Ok(apply_verdicts(claims, resp.methodology_notes, config))
}

/// Seed claims from the specialists' own outputs; used directly when the
/// reasoning backend is disabled.
fn candidate_claims(
    triage: &TriageFindings,
    gottman: &GottmanFindings,
    dynamics: &DynamicsFindings,
    chronicle: &ChronicleFindings,
) -> Vec<VerifiedClaim> {
    let mut claims = Vec::new();

    for flag in &triage.red_flags {
        claims.push(VerifiedClaim {
            claim: format!("{}: {}", flag.r#type, flag.description),
            agent: "triage".to_string(),
            evidence: format!("messages {:?}", flag.message_indices),
            confidence: flag.confidence,
            instances: flag.message_indices.len() as u32,
            veto: false,
            veto_reason: None,
        });
    }

    for (name, tally) in [
        ("criticism", &gottman.criticism),
        ("contempt", &gottman.contempt),
        ("defensiveness", &gottman.defensiveness),
        ("stonewalling", &gottman.stonewalling),
    ] {
        if tally.count > 0 {
            claims.push(VerifiedClaim {
                claim: format!("{} present ({} instances)", name, tally.count),
                agent: "gottman".to_string(),
                evidence: tally
                    .examples
                    .first()
                    .map(|e| e.quote.clone())
                    .unwrap_or_default(),
                confidence: (50 + tally.count as u32 * 5).min(95),
                instances: tally.count as u32,
                veto: false,
                veto_reason: None,
            });
        }
    }

    for pattern in dynamics.patterns.iter().filter(|p| p.detected) {
        claims.push(VerifiedClaim {
            claim: pattern.name.clone(),
            agent: "dynamics".to_string(),
            evidence: pattern.evidence.clone(),
            confidence: pattern.confidence,
            instances: 1,
            veto: false,
            veto_reason: None,
        });
    }

    for point in &chronicle.turning_points {
        claims.push(VerifiedClaim {
            claim: format!("turning point: {}", point.description),
            agent: "chronicle".to_string(),
            evidence: point.date.clone(),
            confidence: chronicle.trajectory.confidence,
            instances: 1,
            veto: false,
            veto_reason: None,
        });
    }

    claims
}

/// The local decision rule. Confidence at or above the cutoff verifies a
/// claim; under-evidenced claims are floored to low confidence first.
fn apply_verdicts(
    claims: Vec<VerifiedClaim>,
    methodology_notes: Vec<String>,
    config: &AnalysisConfig,
) -> VerifierFindings {
    let mut verified = Vec::new();
    let mut vetoed = Vec::new();

    for mut claim in claims {
        if claim.instances < config.min_evidence_instances {
            claim.confidence = claim.confidence.min(LOW_EVIDENCE_CONFIDENCE);
        }

        if claim.confidence >= config.veto_cutoff {
            claim.veto = false;
            claim.veto_reason = None;
            verified.push(claim);
        } else {
            claim.veto = true;
            claim.veto_reason = Some(if claim.instances < config.min_evidence_instances {
                format!(
                    "fewer than {} corroborating instances",
                    config.min_evidence_instances
                )
            } else {
                format!("confidence below {}", config.veto_cutoff)
            });
            vetoed.push(claim);
        }
    }

    let overall_confidence = if verified.is_empty() {
        0
    } else {
        let sum: u32 = verified.iter().map(|c| c.confidence).sum();
        sum / verified.len() as u32
    };

    VerifierFindings {
        verified,
        vetoed,
        overall_confidence,
        methodology_notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(confidence: u32, instances: u32) -> VerifiedClaim {
        VerifiedClaim {
            claim: "test claim".into(),
            agent: "triage".into(),
            evidence: "messages".into(),
            confidence,
            instances,
            veto: false,
            veto_reason: None,
        }
    }

    fn cfg() -> AnalysisConfig {
        AnalysisConfig::default()
    }

    #[test]
    fn veto_boundary_is_inclusive_on_the_verified_side() {
        let findings = apply_verdicts(vec![claim(70, 3), claim(69, 3)], Vec::new(), &cfg());
        assert_eq!(findings.verified.len(), 1);
        assert_eq!(findings.verified[0].confidence, 70);
        assert_eq!(findings.vetoed.len(), 1);
        assert_eq!(findings.vetoed[0].confidence, 69);
        assert!(findings.vetoed[0].veto);
    }

    #[test]
    fn thin_evidence_floors_confidence_before_the_check() {
        // 90 confidence but a single instance: floored to 40, vetoed.
        let findings = apply_verdicts(vec![claim(90, 1)], Vec::new(), &cfg());
        assert!(findings.verified.is_empty());
        assert_eq!(findings.vetoed[0].confidence, 40);
        assert!(findings.vetoed[0]
            .veto_reason
            .as_deref()
            .unwrap()
            .contains("corroborating"));
    }

    #[test]
    fn overall_confidence_averages_verified_claims() {
        let findings = apply_verdicts(vec![claim(80, 2), claim(90, 4)], Vec::new(), &cfg());
        assert_eq!(findings.overall_confidence, 85);

        let none = apply_verdicts(vec![claim(10, 5)], Vec::new(), &cfg());
        assert_eq!(none.overall_confidence, 0);
    }

    #[test]
    fn candidates_seed_from_specialists() {
        let triage = TriageFindings {
            red_flags: vec![crate::models::RedFlag {
                r#type: "stonewalling".into(),
                description: "repeated shutdowns".into(),
                confidence: 85,
                message_indices: vec![3, 9, 14],
            }],
            ..Default::default()
        };
        let claims = candidate_claims(
            &triage,
            &GottmanFindings::default(),
            &DynamicsFindings::default(),
            &ChronicleFindings::default(),
        );
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].instances, 3);
        assert_eq!(claims[0].agent, "triage");
    }
}
