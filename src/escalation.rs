//! Guardian-visible safety reports and alert delivery.
//!
//! Report creation is idempotent per message id so a retried request never
//! produces duplicate guardian alerts. Notification delivery is best-effort:
//! a failing channel is logged and the chat request proceeds.

use crate::error::{PipelineError, Result};
use crate::guardrails::GuardrailSettings;
use crate::profile::ChildProfile;
use crate::safety::RiskTier;
use crate::GuardianId;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row as _, SqlitePool};
use std::sync::Arc;

/// How much message text a report carries.
const EXCERPT_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportType {
    RealTime,
    Retrospective,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::RealTime => "real_time",
            ReportType::Retrospective => "retrospective",
        }
    }
}

/// A guardian-visible escalation record.
#[derive(Debug, Clone, Serialize)]
pub struct SafetyReport {
    pub id: String,
    pub guardian_id: String,
    pub child_id: String,
    pub message_id: String,
    pub report_type: String,
    pub severity: RiskTier,
    pub summary: String,
    pub message_excerpt: String,
    pub explanation: String,
    pub reviewed: bool,
    pub guardian_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Delivery channel for guardian alerts. Implementations own their failure
/// handling; the reporter logs and moves on if delivery errors.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, report: &SafetyReport) -> Result<()>;
}

/// Default notifier: structured log only. Real delivery (push, email) is an
/// external collaborator wired in at startup.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, report: &SafetyReport) -> Result<()> {
        tracing::info!(
            report_id = %report.id,
            guardian_id = %report.guardian_id,
            severity = %report.severity,
            "guardian alert"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct EscalationReporter {
    pool: SqlitePool,
    notifier: Arc<dyn Notifier>,
}

impl EscalationReporter {
    pub fn new(pool: SqlitePool, notifier: Arc<dyn Notifier>) -> Self {
        Self { pool, notifier }
    }

    /// Create a report for a risk-tiered message and deliver the guardian
    /// alert when policy asks for it.
    ///
    /// Idempotent on message id: replaying the same message yields the
    /// existing report and delivers no second alert. Red reports are always
    /// created and always notified; yellow reports are always created but
    /// notified only under `notify_on_yellow`.
    pub async fn escalate(
        &self,
        child: &ChildProfile,
        message_id: &str,
        message_content: &str,
        tier: RiskTier,
        explanation: &str,
        policy: &GuardrailSettings,
    ) -> Result<Option<SafetyReport>> {
        if tier < RiskTier::Yellow {
            return Ok(None);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let summary = match tier {
            RiskTier::Red => format!("{}'s message was blocked", child.display_name),
            _ => format!("{}'s message was flagged for review", child.display_name),
        };
        let excerpt = truncate_chars(message_content, EXCERPT_MAX_CHARS);

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO safety_reports \
                (id, guardian_id, child_id, message_id, report_type, severity, \
                 summary, message_excerpt, explanation) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(child.guardian_id.as_ref())
        .bind(child.id.as_ref())
        .bind(message_id)
        .bind(ReportType::RealTime.as_str())
        .bind(tier.as_str())
        .bind(&summary)
        .bind(&excerpt)
        .bind(explanation)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let report = self
            .fetch_by_message(message_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("report for message {message_id}")))?;

        // Only the request that won the insert delivers the alert.
        if inserted > 0 {
            let should_notify = match tier {
                RiskTier::Red => true,
                RiskTier::Yellow => policy.notify_on_yellow,
                RiskTier::Green => false,
            };
            if should_notify {
                if let Err(error) = self.notifier.notify(&report).await {
                    tracing::warn!(%error, report_id = %report.id, "guardian notification failed");
                }
            }
        }

        Ok(Some(report))
    }

    /// Mark a report reviewed, recording the guardian's notes. Scoped to the
    /// owning guardian.
    pub async fn mark_reviewed(
        &self,
        report_id: &str,
        guardian_id: &GuardianId,
        notes: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE safety_reports \
             SET reviewed = 1, guardian_notes = ?, reviewed_at = CURRENT_TIMESTAMP \
             WHERE id = ? AND guardian_id = ?",
        )
        .bind(notes)
        .bind(report_id)
        .bind(guardian_id.as_ref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::NotFound(format!("report {report_id}")));
        }
        Ok(())
    }

    /// List a guardian's reports, unreviewed first, newest first within each
    /// group.
    pub async fn list_for_guardian(
        &self,
        guardian_id: &GuardianId,
        limit: i64,
    ) -> Result<Vec<SafetyReport>> {
        let rows = sqlx::query(
            "SELECT id, guardian_id, child_id, message_id, report_type, severity, summary, \
                    message_excerpt, explanation, reviewed, guardian_notes, created_at \
             FROM safety_reports WHERE guardian_id = ? \
             ORDER BY reviewed ASC, created_at DESC \
             LIMIT ?",
        )
        .bind(guardian_id.as_ref())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(decode_report).collect())
    }

    async fn fetch_by_message(&self, message_id: &str) -> Result<Option<SafetyReport>> {
        let row = sqlx::query(
            "SELECT id, guardian_id, child_id, message_id, report_type, severity, summary, \
                    message_excerpt, explanation, reviewed, guardian_notes, created_at \
             FROM safety_reports WHERE message_id = ?",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(decode_report))
    }
}

fn decode_report(row: sqlx::sqlite::SqliteRow) -> SafetyReport {
    let severity: String = row.try_get("severity").unwrap_or_default();
    SafetyReport {
        id: row.try_get("id").unwrap_or_default(),
        guardian_id: row.try_get("guardian_id").unwrap_or_default(),
        child_id: row.try_get("child_id").unwrap_or_default(),
        message_id: row.try_get("message_id").unwrap_or_default(),
        report_type: row.try_get("report_type").unwrap_or_default(),
        severity: RiskTier::parse(&severity).unwrap_or(RiskTier::Red),
        summary: row.try_get("summary").unwrap_or_default(),
        message_excerpt: row.try_get("message_excerpt").unwrap_or_default(),
        explanation: row.try_get("explanation").unwrap_or_default(),
        reviewed: row.try_get("reviewed").unwrap_or(false),
        guardian_notes: row.try_get("guardian_notes").ok(),
        created_at: row
            .try_get("created_at")
            .unwrap_or_else(|_| chrono::Utc::now()),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts deliveries so tests can assert on alert behavior.
    #[derive(Debug, Default)]
    struct CountingNotifier {
        delivered: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify(&self, _report: &SafetyReport) -> Result<()> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn child() -> ChildProfile {
        ChildProfile {
            id: Arc::from("child-1"),
            guardian_id: Arc::from("guardian-1"),
            display_name: "Mia".into(),
            age: 8,
            personality_mode: "playful".into(),
        }
    }

    async fn reporter_with_counter() -> (Db, EscalationReporter, Arc<CountingNotifier>) {
        let db = Db::connect_in_memory().await.expect("db should connect");
        let notifier = Arc::new(CountingNotifier::default());
        let reporter = EscalationReporter::new(db.pool.clone(), notifier.clone());
        (db, reporter, notifier)
    }

    #[tokio::test]
    async fn green_tier_creates_no_report() {
        let (_db, reporter, notifier) = reporter_with_counter().await;
        let report = reporter
            .escalate(
                &child(),
                "msg-1",
                "why is the sky blue",
                RiskTier::Green,
                "no concerns",
                &GuardrailSettings::default(),
            )
            .await
            .expect("escalate should succeed");
        assert!(report.is_none());
        assert_eq!(notifier.delivered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn red_report_is_created_and_notified_regardless_of_policy() {
        let (_db, reporter, notifier) = reporter_with_counter().await;
        let mut policy = GuardrailSettings::default();
        policy.notify_on_yellow = false;

        let report = reporter
            .escalate(
                &child(),
                "msg-1",
                "I hate my life and want to disappear",
                RiskTier::Red,
                "flagged categories: self_harm",
                &policy,
            )
            .await
            .expect("escalate should succeed")
            .expect("red tier must create a report");

        assert_eq!(report.severity, RiskTier::Red);
        assert_eq!(notifier.delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn yellow_report_is_created_but_notification_is_policy_gated() {
        let (_db, reporter, notifier) = reporter_with_counter().await;
        let mut policy = GuardrailSettings::default();
        policy.notify_on_yellow = false;

        let report = reporter
            .escalate(
                &child(),
                "msg-1",
                "they bully me at school",
                RiskTier::Yellow,
                "flagged categories: hostility",
                &policy,
            )
            .await
            .expect("escalate should succeed")
            .expect("yellow tier still creates the audit record");

        assert_eq!(report.severity, RiskTier::Yellow);
        assert_eq!(notifier.delivered.load(Ordering::SeqCst), 0);

        policy.notify_on_yellow = true;
        reporter
            .escalate(
                &child(),
                "msg-2",
                "they bully me at school",
                RiskTier::Yellow,
                "flagged categories: hostility",
                &policy,
            )
            .await
            .expect("escalate should succeed");
        assert_eq!(notifier.delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn escalation_is_idempotent_per_message_id() {
        let (db, reporter, notifier) = reporter_with_counter().await;
        let policy = GuardrailSettings::default();

        let first = reporter
            .escalate(&child(), "msg-1", "bad", RiskTier::Red, "x", &policy)
            .await
            .expect("escalate should succeed")
            .expect("report should exist");
        let second = reporter
            .escalate(&child(), "msg-1", "bad", RiskTier::Red, "x", &policy)
            .await
            .expect("replay should succeed")
            .expect("report should exist");

        assert_eq!(first.id, second.id);
        assert_eq!(notifier.delivered.load(Ordering::SeqCst), 1, "one alert, not two");

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM safety_reports")
            .fetch_one(&db.pool)
            .await
            .expect("count should succeed");
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn review_is_scoped_to_the_owning_guardian() {
        let (_db, reporter, _notifier) = reporter_with_counter().await;
        let report = reporter
            .escalate(
                &child(),
                "msg-1",
                "bad",
                RiskTier::Red,
                "x",
                &GuardrailSettings::default(),
            )
            .await
            .expect("escalate should succeed")
            .expect("report should exist");

        let stranger: GuardianId = Arc::from("guardian-2");
        let error = reporter
            .mark_reviewed(&report.id, &stranger, Some("not mine"))
            .await
            .expect_err("cross-guardian review must fail");
        assert!(matches!(error, PipelineError::NotFound(_)));

        let owner: GuardianId = Arc::from("guardian-1");
        reporter
            .mark_reviewed(&report.id, &owner, Some("talked to Mia"))
            .await
            .expect("owner review should succeed");

        let listed = reporter
            .list_for_guardian(&owner, 10)
            .await
            .expect("list should succeed");
        assert_eq!(listed.len(), 1);
        assert!(listed[0].reviewed);
        assert_eq!(listed[0].guardian_notes.as_deref(), Some("talked to Mia"));
    }
}
