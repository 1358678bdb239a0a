//! Report assembly.
//!
//! Pure functions from persisted findings to the display-ready [`Report`].
//! Assembly reads no clocks and no environment: the same case artifacts
//! always produce byte-identical output, so a retried finalize step can
//! overwrite the stored report without churn.

use serde_json::json;

use crate::models::{
    Chapter, DeepFindings, Report, ReportMetadata, Section, SectionKind, Timeline,
    TriageFindings,
};

/// Assemble the quick baseline report from triage findings alone.
pub fn assemble_baseline(case_id: &str, triage: &TriageFindings, timeline: &Timeline) -> Report {
    let chapters = vec![
        quick_assessment(triage, timeline),
        red_flag_chapter("Red Flags Detected", triage),
        what_to_watch_for(triage),
    ];

    Report {
        case_id: case_id.to_string(),
        report_type: "baseline".to_string(),
        chapters,
        metadata: metadata(timeline, 0, health_hint(triage)),
    }
}

/// Assemble the full deep report from all five specialists.
pub fn assemble_deep(case_id: &str, findings: &DeepFindings, timeline: &Timeline) -> Report {
    let chapters = vec![
        executive_summary(findings, timeline),
        the_timeline(findings, timeline),
        behavior_scorecard(findings),
        attachment_map(findings),
        communication_audit(findings),
        critical_episodes(findings),
        red_flag_chapter("Red Flags", &findings.triage),
        longitudinal_analysis(findings),
        action_guide(findings),
    ];

    Report {
        case_id: case_id.to_string(),
        report_type: "deep".to_string(),
        chapters,
        metadata: metadata(
            timeline,
            findings.verifier.overall_confidence,
            findings.gottman.overall_health_score,
        ),
    }
}

fn metadata(timeline: &Timeline, confidence: u32, health: u32) -> ReportMetadata {
    ReportMetadata {
        total_messages: timeline.total_count,
        date_range: timeline.date_range.clone(),
        senders: timeline.senders.clone(),
        overall_confidence: confidence,
        overall_health_score: health,
    }
}

/// Baseline has no behavior coding; derive a rough health hint from flag
/// confidence so the metadata slot is never meaningless.
fn health_hint(triage: &TriageFindings) -> u32 {
    let penalty: u32 = triage.red_flags.iter().map(|f| f.confidence / 10).sum();
    100u32.saturating_sub(penalty.min(60))
}

fn text(heading: &str, value: impl Into<String>) -> Section {
    Section {
        heading: heading.to_string(),
        kind: SectionKind::Text,
        content: json!(value.into()),
    }
}

fn score(heading: &str, value: u32) -> Section {
    Section {
        heading: heading.to_string(),
        kind: SectionKind::Score,
        content: json!(value),
    }
}

fn list(heading: &str, items: Vec<serde_json::Value>) -> Section {
    Section {
        heading: heading.to_string(),
        kind: SectionKind::List,
        content: json!(items),
    }
}

fn table(heading: &str, rows: serde_json::Value) -> Section {
    Section {
        heading: heading.to_string(),
        kind: SectionKind::Table,
        content: rows,
    }
}

// ---- baseline chapters ----

fn quick_assessment(triage: &TriageFindings, timeline: &Timeline) -> Chapter {
    let summary = triage
        .summary
        .clone()
        .unwrap_or_else(|| "No summary available.".to_string());

    Chapter {
        title: "Quick Assessment".to_string(),
        sections: vec![
            text("Summary", summary),
            table(
                "Scope",
                json!({
                    "messages_scanned": triage.total_messages_scanned,
                    "participants": timeline.senders,
                    "hot_zones": triage.hot_zones.len(),
                }),
            ),
        ],
    }
}

fn red_flag_chapter(title: &str, triage: &TriageFindings) -> Chapter {
    let flags: Vec<serde_json::Value> = triage
        .red_flags
        .iter()
        .map(|f| {
            json!({
                "type": f.r#type,
                "description": f.description,
                "confidence": f.confidence,
                "message_indices": f.message_indices,
            })
        })
        .collect();

    let sections = if flags.is_empty() {
        vec![text("None detected", "No red flags were identified in this conversation.")]
    } else {
        vec![list("Flags", flags)]
    };

    Chapter {
        title: title.to_string(),
        sections,
    }
}

fn what_to_watch_for(triage: &TriageFindings) -> Chapter {
    let zones: Vec<serde_json::Value> = triage
        .hot_zones
        .iter()
        .map(|z| {
            json!({
                "messages": format!("{}-{}", z.start_index, z.end_index),
                "intensity": z.intensity_score,
                "summary": z.brief_summary,
            })
        })
        .collect();

    let sections = if zones.is_empty() {
        vec![text(
            "Guidance",
            "Nothing stood out on a first pass. A deep analysis can still surface slower-moving patterns.",
        )]
    } else {
        vec![list("Stretches worth a closer look", zones)]
    };

    Chapter {
        title: "What to Watch For".to_string(),
        sections,
    }
}

// ---- deep chapters ----

fn executive_summary(findings: &DeepFindings, timeline: &Timeline) -> Chapter {
    let summary = findings
        .triage
        .summary
        .clone()
        .unwrap_or_else(|| "No summary available.".to_string());

    Chapter {
        title: "Executive Summary".to_string(),
        sections: vec![
            text("Overview", summary),
            score("Relationship Health", findings.gottman.overall_health_score),
            score("Analysis Confidence", findings.verifier.overall_confidence),
            table(
                "Conversation",
                json!({
                    "messages": timeline.total_count,
                    "participants": timeline.senders,
                    "duration_days": timeline.stats.total_duration_days,
                    "silence_gaps": timeline.gaps.len(),
                }),
            ),
        ],
    }
}

fn the_timeline(findings: &DeepFindings, timeline: &Timeline) -> Chapter {
    let events: Vec<serde_json::Value> = findings
        .chronicle
        .event_timeline
        .iter()
        .map(|e| {
            json!({
                "date": e.date,
                "type": e.event_type,
                "description": e.description,
                "significance": e.significance,
            })
        })
        .collect();

    let mut sections = vec![Section {
        heading: "Events".to_string(),
        kind: SectionKind::TimelineEvent,
        content: json!(events),
    }];

    if !timeline.gaps.is_empty() {
        let gaps: Vec<serde_json::Value> = timeline
            .gaps
            .iter()
            .map(|g| {
                json!({
                    "after_message": g.after_index,
                    "days": (g.duration_hours / 24.0 * 10.0).round() / 10.0,
                })
            })
            .collect();
        sections.push(list("Silences", gaps));
    }

    Chapter {
        title: "The Timeline".to_string(),
        sections,
    }
}

fn behavior_scorecard(findings: &DeepFindings) -> Chapter {
    let g = &findings.gottman;
    let rows = json!({
        "criticism": { "count": g.criticism.count, "percentile": g.criticism.percentile },
        "contempt": { "count": g.contempt.count, "percentile": g.contempt.percentile },
        "defensiveness": { "count": g.defensiveness.count, "percentile": g.defensiveness.percentile },
        "stonewalling": { "count": g.stonewalling.count, "percentile": g.stonewalling.percentile },
        "repair_attempts": { "count": g.repair_attempts.count, "success_rate": g.repair_attempts.success_rate },
    });

    Chapter {
        title: "Behavior Scorecard".to_string(),
        sections: vec![
            table("Tallies", rows),
            score("Health Score", g.overall_health_score),
        ],
    }
}

fn attachment_map(findings: &DeepFindings) -> Chapter {
    let styles = &findings.dynamics.attachment_style;
    Chapter {
        title: "Attachment Map".to_string(),
        sections: vec![table(
            "Assessed Styles",
            json!({
                "person_a": { "style": styles.person_a.style, "confidence": styles.person_a.confidence },
                "person_b": { "style": styles.person_b.style, "confidence": styles.person_b.confidence },
            }),
        )],
    }
}

fn communication_audit(findings: &DeepFindings) -> Chapter {
    let d = &findings.dynamics;
    let mut sections = vec![
        Section {
            heading: "Pronoun Usage".to_string(),
            kind: SectionKind::ChartData,
            content: serde_json::to_value(&d.pronoun_analysis).unwrap_or_default(),
        },
        Section {
            heading: "Response Latency".to_string(),
            kind: SectionKind::ChartData,
            content: serde_json::to_value(&d.latency_analysis).unwrap_or_default(),
        },
    ];

    if !d.interaction_loops.is_empty() {
        let loops: Vec<serde_json::Value> = d
            .interaction_loops
            .iter()
            .map(|l| {
                json!({
                    "type": l.r#type,
                    "description": l.description,
                    "frequency": l.frequency,
                })
            })
            .collect();
        sections.push(list("Interaction Loops", loops));
    }

    Chapter {
        title: "Communication Audit".to_string(),
        sections,
    }
}

fn critical_episodes(findings: &DeepFindings) -> Chapter {
    let zones: Vec<serde_json::Value> = findings
        .triage
        .hot_zones
        .iter()
        .map(|z| {
            json!({
                "messages": format!("{}-{}", z.start_index, z.end_index),
                "intensity": z.intensity_score,
                "summary": z.brief_summary,
                "indicators": z.indicators,
            })
        })
        .collect();

    let sections = if zones.is_empty() {
        vec![text("None", "No critical episodes were identified.")]
    } else {
        vec![list("Episodes", zones)]
    };

    Chapter {
        title: "Critical Episodes".to_string(),
        sections,
    }
}

fn longitudinal_analysis(findings: &DeepFindings) -> Chapter {
    let c = &findings.chronicle;
    let mut sections = vec![text(
        "Trajectory",
        format!("{} — {}", c.trajectory.overall, c.trajectory.description),
    )];

    if !c.recurring_themes.is_empty() {
        let themes: Vec<serde_json::Value> = c
            .recurring_themes
            .iter()
            .map(|t| {
                json!({
                    "theme": t.theme,
                    "frequency": t.frequency,
                    "status": t.resolution_status,
                })
            })
            .collect();
        sections.push(list("Recurring Themes", themes));
    }

    if !c.turning_points.is_empty() {
        let points: Vec<serde_json::Value> = c
            .turning_points
            .iter()
            .map(|p| {
                json!({
                    "date": p.date,
                    "description": p.description,
                    "impact": p.impact,
                })
            })
            .collect();
        sections.push(list("Turning Points", points));
    }

    Chapter {
        title: "Longitudinal Analysis".to_string(),
        sections,
    }
}

fn action_guide(findings: &DeepFindings) -> Chapter {
    let mut items: Vec<serde_json::Value> = Vec::new();

    let g = &findings.gottman;
    if g.contempt.count > 0 {
        items.push(json!("Contempt appeared in this history; it is the strongest single predictor of breakdown and worth addressing first."));
    }
    if g.repair_attempts.count > 0 && g.repair_attempts.success_rate < 50 {
        items.push(json!("Repair attempts are being made but mostly failing; acknowledging them explicitly tends to change outcomes."));
    }
    if g.stonewalling.count > 0 {
        items.push(json!("Stonewalling episodes were coded; agreeing on a pause-and-return signal can interrupt the shutdown cycle."));
    }
    for claim in &findings.verifier.verified {
        items.push(json!(format!("Verified: {}", claim.claim)));
    }
    if items.is_empty() {
        items.push(json!(
            "No specific interventions indicated; the coded behaviors stayed below concerning levels."
        ));
    }

    Chapter {
        title: "Action Guide".to_string(),
        sections: vec![list("Recommendations", items)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::models::{GapRecord, RawMessage, RedFlag};
    use crate::timeline::stitch;

    fn sample_timeline() -> Timeline {
        let mut a = RawMessage::new("chat.txt", "we need to talk");
        a.sender = Some("Alex".into());
        a.timestamp = Some("2024-03-01 10:00:00".into());
        let mut b = RawMessage::new("chat.txt", "about what exactly");
        b.sender = Some("Sam".into());
        b.timestamp = Some("2024-03-01 10:05:00".into());
        stitch(vec![a, b], &AnalysisConfig::default()).unwrap()
    }

    fn sample_triage() -> TriageFindings {
        TriageFindings {
            red_flags: vec![RedFlag {
                r#type: "dismissal".into(),
                description: "repeated dismissive replies".into(),
                confidence: 80,
                message_indices: vec![1],
            }],
            total_messages_scanned: 2,
            summary: Some("Mild friction.".into()),
            ..Default::default()
        }
    }

    #[test]
    fn baseline_report_is_byte_idempotent() {
        let timeline = sample_timeline();
        let triage = sample_triage();
        let first = serde_json::to_vec(&assemble_baseline("case-1", &triage, &timeline)).unwrap();
        let second = serde_json::to_vec(&assemble_baseline("case-1", &triage, &timeline)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn baseline_chapter_order() {
        let report = assemble_baseline("case-1", &sample_triage(), &sample_timeline());
        let titles: Vec<&str> = report.chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Quick Assessment", "Red Flags Detected", "What to Watch For"]
        );
        assert_eq!(report.report_type, "baseline");
        assert_eq!(report.metadata.total_messages, 2);
    }

    #[test]
    fn deep_report_chapter_order_and_metadata() {
        let mut timeline = sample_timeline();
        timeline.gaps.push(GapRecord {
            after_index: 0,
            duration_hours: 72.0,
            start: timeline.date_range.start.unwrap(),
            end: timeline.date_range.end.unwrap(),
        });

        let mut findings = DeepFindings {
            triage: sample_triage(),
            gottman: Default::default(),
            dynamics: Default::default(),
            chronicle: Default::default(),
            verifier: Default::default(),
        };
        findings.gottman.overall_health_score = 85;
        findings.verifier.overall_confidence = 77;

        let report = assemble_deep("case-2", &findings, &timeline);
        let titles: Vec<&str> = report.chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Executive Summary",
                "The Timeline",
                "Behavior Scorecard",
                "Attachment Map",
                "Communication Audit",
                "Critical Episodes",
                "Red Flags",
                "Longitudinal Analysis",
                "Action Guide",
            ]
        );
        assert_eq!(report.metadata.overall_health_score, 85);
        assert_eq!(report.metadata.overall_confidence, 77);
    }

    #[test]
    fn health_hint_penalizes_flags_but_floors() {
        assert_eq!(health_hint(&TriageFindings::default()), 100);
        let mut triage = sample_triage();
        triage.red_flags[0].confidence = 100;
        assert_eq!(health_hint(&triage), 90);
        for _ in 0..20 {
            triage.red_flags.push(triage.red_flags[0].clone());
        }
        // Penalty caps at 60 points.
        assert_eq!(health_hint(&triage), 40);
    }
}
