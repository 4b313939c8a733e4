//! Application service over the routing, lifecycle and escalation engines.
//!
//! Each operation loads its org and workflow sources fresh, runs the pure
//! core logic against them, persists through the conditional-write
//! repositories and drains the per-operation audit trail into the store.
//! Audit persistence is best-effort: a failed trail write is logged and never
//! fails the operation it describes.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use furlo_core::audit::{InMemoryAuditSink, NoopAuditSink};
use furlo_core::chain::{ChainBuilder, ChainPolicy, ChainSources};
use furlo_core::domain::employee::EmployeeId;
use furlo_core::domain::leave::{ApprovalStep, LeaveRequest, LeaveRequestId};
use furlo_core::errors::{ApplicationError, DomainError};
use furlo_core::escalation::{
    pending_days, EscalationPolicy, EscalationStore, SweepReport, Sweeper, REPORT_BUCKET_DAYS,
};
use furlo_core::lifecycle::{self, Decision, NotificationEvent, NotificationSink};
use furlo_core::org::OrgSnapshot;
use furlo_db::repositories::{
    AuditEventRepository, EmployeeRepository, LeaveRequestRepository, WorkflowRepository,
};

pub struct ApprovalService<R>
where
    R: LeaveRequestRepository + EscalationStore,
{
    employees: Arc<dyn EmployeeRepository>,
    workflows: Arc<dyn WorkflowRepository>,
    requests: Arc<R>,
    audits: Arc<dyn AuditEventRepository>,
    notifier: Arc<dyn NotificationSink>,
    chain_policy: ChainPolicy,
    escalation_policy: EscalationPolicy,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SubmitRequest {
    pub requester_id: String,
    pub leave_type: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Clone, Debug, Serialize)]
pub struct SubmitOutcome {
    pub request: LeaveRequest,
    pub notifications: Vec<NotificationEvent>,
}

/// "Pending N+ days" counts for the report endpoint. Buckets overlap by
/// design; a request pending 8 days appears in all three.
#[derive(Clone, Debug, Serialize)]
pub struct PendingAgeReport {
    pub generated_at: DateTime<Utc>,
    pub buckets: Vec<PendingAgeBucket>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PendingAgeBucket {
    pub min_days: i64,
    pub request_ids: Vec<LeaveRequestId>,
}

impl<R> ApprovalService<R>
where
    R: LeaveRequestRepository + EscalationStore,
{
    pub fn new(
        employees: Arc<dyn EmployeeRepository>,
        workflows: Arc<dyn WorkflowRepository>,
        requests: Arc<R>,
        audits: Arc<dyn AuditEventRepository>,
        notifier: Arc<dyn NotificationSink>,
        chain_policy: ChainPolicy,
        escalation_policy: EscalationPolicy,
    ) -> Self {
        Self { employees, workflows, requests, audits, notifier, chain_policy, escalation_policy }
    }

    async fn snapshot(&self) -> Result<OrgSnapshot, ApplicationError> {
        Ok(OrgSnapshot::new(self.employees.list_active().await?))
    }

    async fn chain_sources(
        &self,
        requester_id: &EmployeeId,
    ) -> Result<ChainSources, ApplicationError> {
        Ok(ChainSources {
            snapshot: self.snapshot().await?,
            templates: self.workflows.list_templates().await?,
            user_flow: self.workflows.find_user_flow(requester_id).await?,
        })
    }

    async fn drain_audit(&self, sink: &InMemoryAuditSink) {
        let events = sink.events();
        if events.is_empty() {
            return;
        }
        if let Err(error) = self.audits.record_all(&events).await {
            warn!(
                event_name = "system.audit.write_failed",
                error = %error,
                events = events.len(),
                "audit trail write failed; operation result is unaffected"
            );
        }
    }

    /// Hand each transition's notifications to the delivery seam. Delivery is
    /// fire-and-forget from the engine's point of view.
    fn dispatch(&self, events: &[NotificationEvent]) {
        for event in events {
            self.notifier.notify(event.clone());
        }
    }

    /// Dry-run chain computation. Same code path as submission, but nothing
    /// is persisted, including the audit trail.
    pub async fn simulate_chain(
        &self,
        user_id: &EmployeeId,
    ) -> Result<Vec<ApprovalStep>, ApplicationError> {
        let sources = self.chain_sources(user_id).await?;
        let chain = ChainBuilder::new(self.chain_policy)
            .build(&sources, user_id, &NoopAuditSink, "simulate")
            .map_err(DomainError::from)?;
        Ok(chain)
    }

    pub async fn submit(&self, input: SubmitRequest) -> Result<SubmitOutcome, ApplicationError> {
        if input.start_date > input.end_date {
            return Err(DomainError::InvariantViolation(format!(
                "start date {} is after end date {}",
                input.start_date, input.end_date
            ))
            .into());
        }
        if input.leave_type.trim().is_empty() {
            return Err(DomainError::InvariantViolation("leave type is empty".to_string()).into());
        }

        let requester_id = EmployeeId(input.requester_id);
        let correlation_id = Uuid::new_v4().to_string();
        let sink = InMemoryAuditSink::default();

        let sources = self.chain_sources(&requester_id).await?;
        let chain = ChainBuilder::new(self.chain_policy)
            .build(&sources, &requester_id, &sink, &correlation_id)
            .map_err(DomainError::from)?;

        let now = Utc::now();
        let total_days = (input.end_date - input.start_date).num_days() as u32 + 1;
        let mut request = LeaveRequest::submit(
            LeaveRequestId(format!("lr-{}", Uuid::new_v4())),
            requester_id,
            input.leave_type,
            input.start_date,
            input.end_date,
            total_days,
            &chain,
            now,
        );
        let notifications = lifecycle::settle_submission(&mut request, now);

        self.requests.insert(&request).await?;
        self.drain_audit(&sink).await;
        self.dispatch(&notifications);

        Ok(SubmitOutcome { request, notifications })
    }

    pub async fn get(&self, id: &LeaveRequestId) -> Result<LeaveRequest, ApplicationError> {
        self.requests
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound(format!("leave request `{}`", id.0)))
    }

    pub async fn decide(
        &self,
        id: &LeaveRequestId,
        level: u32,
        approver_id: &EmployeeId,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<LeaveRequest, ApplicationError> {
        let mut request = self.get(id).await?;
        let correlation_id = Uuid::new_v4().to_string();
        let sink = InMemoryAuditSink::default();

        let notifications = lifecycle::decide(
            &mut request,
            level,
            approver_id,
            decision,
            comment,
            Utc::now(),
            &sink,
            &correlation_id,
        )
        .map_err(DomainError::from)?;

        if !self.requests.apply_transition(&request, Some(level)).await? {
            return Err(ApplicationError::Conflict(format!(
                "request `{}` changed while the decision was being applied",
                id.0
            )));
        }
        self.drain_audit(&sink).await;
        self.dispatch(&notifications);

        Ok(request)
    }

    pub async fn cancel(
        &self,
        id: &LeaveRequestId,
        requester_id: &EmployeeId,
    ) -> Result<LeaveRequest, ApplicationError> {
        let mut request = self.get(id).await?;
        let correlation_id = Uuid::new_v4().to_string();
        let sink = InMemoryAuditSink::default();

        let expected_level = request.current_level;
        let notifications = lifecycle::cancel(&mut request, requester_id, &sink, &correlation_id)
            .map_err(DomainError::from)?;

        if !self.requests.apply_transition(&request, expected_level).await? {
            return Err(ApplicationError::Conflict(format!(
                "request `{}` changed while the cancellation was being applied",
                id.0
            )));
        }
        self.drain_audit(&sink).await;
        self.dispatch(&notifications);

        Ok(request)
    }

    /// One escalation pass. With `ids`, the staleness cutoff is skipped and
    /// only the named requests are considered.
    pub async fn sweep(
        &self,
        ids: Option<&[LeaveRequestId]>,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, ApplicationError> {
        let snapshot = self.snapshot().await?;
        let sink = InMemoryAuditSink::default();
        let sweeper = Sweeper::new(&*self.requests, &sink, self.escalation_policy);

        let report = match ids {
            Some(ids) => sweeper.sweep_ids(&snapshot, ids, now).await?,
            None => sweeper.sweep(&snapshot, now).await?,
        };
        self.drain_audit(&sink).await;
        self.dispatch(&report.notifications);
        Ok(report)
    }

    pub async fn pending_report(
        &self,
        now: DateTime<Utc>,
    ) -> Result<PendingAgeReport, ApplicationError> {
        let open = self.requests.list_open().await?;
        let buckets = REPORT_BUCKET_DAYS
            .iter()
            .map(|&min_days| PendingAgeBucket {
                min_days,
                request_ids: open
                    .iter()
                    .filter(|request| pending_days(request, now) >= min_days)
                    .map(|request| request.id.clone())
                    .collect(),
            })
            .collect();
        Ok(PendingAgeReport { generated_at: now, buckets })
    }

    pub async fn audit_trail(
        &self,
        id: &LeaveRequestId,
    ) -> Result<Vec<furlo_core::audit::AuditEvent>, ApplicationError> {
        Ok(self.audits.list_for_request(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, NaiveDate, Utc};

    use furlo_core::chain::ChainPolicy;
    use furlo_core::domain::employee::{Employee, EmployeeId, Role};
    use furlo_core::domain::leave::{LeaveStatus, HR_SENTINEL_LEVEL};
    use furlo_core::errors::{ApplicationError, DomainError};
    use furlo_core::config::DatabaseConfig;
    use furlo_core::escalation::EscalationPolicy;
    use furlo_core::lifecycle::{
        Decision, InMemoryNotificationSink, NoopNotificationSink, NotificationKind,
        NotificationSink,
    };
    use furlo_db::repositories::{
        EmployeeRepository, SqlAuditEventRepository, SqlEmployeeRepository,
        SqlLeaveRequestRepository, SqlWorkflowRepository,
    };
    use furlo_db::{connect, migrations};

    use super::{ApprovalService, SubmitRequest};

    async fn service() -> ApprovalService<SqlLeaveRequestRepository> {
        service_with(Arc::new(NoopNotificationSink)).await
    }

    async fn service_with(
        notifier: Arc<dyn NotificationSink>,
    ) -> ApprovalService<SqlLeaveRequestRepository> {
        let pool = connect(&DatabaseConfig::in_memory()).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let employees = Arc::new(SqlEmployeeRepository::new(pool.clone()));
        for employee in org() {
            employees.save(employee).await.expect("seed employee");
        }

        ApprovalService::new(
            employees,
            Arc::new(SqlWorkflowRepository::new(pool.clone())),
            Arc::new(SqlLeaveRequestRepository::new(pool.clone())),
            Arc::new(SqlAuditEventRepository::new(pool)),
            notifier,
            ChainPolicy::default(),
            EscalationPolicy::default(),
        )
    }

    fn org() -> Vec<Employee> {
        let worker = |id: &str, role, section: Option<&str>| Employee {
            id: EmployeeId(id.to_string()),
            employee_no: format!("EMP-{id}"),
            role,
            company: "acme".to_string(),
            department: "assembly".to_string(),
            section: section.map(str::to_string),
            shift: None,
            is_active: true,
        };
        vec![
            worker("e1", Role::Employee, Some("line-a")),
            worker("s1", Role::SectionHead, Some("line-a")),
            worker("m1", Role::DeptManager, None),
            worker("hr1", Role::HrManager, None),
        ]
    }

    fn submit_input() -> SubmitRequest {
        SubmitRequest {
            requester_id: "e1".to_string(),
            leave_type: "annual".to_string(),
            start_date: NaiveDate::from_ymd_opt(2026, 9, 7).expect("date"),
            end_date: NaiveDate::from_ymd_opt(2026, 9, 9).expect("date"),
        }
    }

    #[tokio::test]
    async fn submit_freezes_the_chain_and_notifies_the_first_approver() {
        let service = service().await;

        let outcome = service.submit(submit_input()).await.expect("submit");
        assert_eq!(outcome.request.status, LeaveStatus::Pending);
        assert_eq!(outcome.request.total_days, 3);
        assert_eq!(outcome.request.approvals.len(), 3);
        assert_eq!(outcome.notifications[0].recipient.0, "s1");

        let stored = service.get(&outcome.request.id).await.expect("stored");
        assert_eq!(stored, outcome.request);
    }

    #[tokio::test]
    async fn decide_advances_and_stale_replay_is_a_conflict() {
        let service = service().await;
        let outcome = service.submit(submit_input()).await.expect("submit");
        let id = outcome.request.id.clone();

        let after = service
            .decide(&id, 1, &EmployeeId("s1".to_string()), Decision::Approve, None)
            .await
            .expect("decide");
        assert_eq!(after.current_level, Some(2));

        let err = service
            .decide(&id, 1, &EmployeeId("s1".to_string()), Decision::Approve, None)
            .await
            .expect_err("level 1 already decided");
        assert!(matches!(err, ApplicationError::Domain(DomainError::Transition(_))));
    }

    #[tokio::test]
    async fn cancel_is_requester_only() {
        let service = service().await;
        let outcome = service.submit(submit_input()).await.expect("submit");
        let id = outcome.request.id.clone();

        let err = service
            .cancel(&id, &EmployeeId("s1".to_string()))
            .await
            .expect_err("approver cannot cancel");
        assert!(matches!(err, ApplicationError::Domain(_)));

        let cancelled =
            service.cancel(&id, &EmployeeId("e1".to_string())).await.expect("cancel");
        assert_eq!(cancelled.status, LeaveStatus::Cancelled);
    }

    #[tokio::test]
    async fn simulation_matches_submission_chain() {
        let service = service().await;
        let simulated =
            service.simulate_chain(&EmployeeId("e1".to_string())).await.expect("simulate");
        let outcome = service.submit(submit_input()).await.expect("submit");

        let submitted: Vec<(u32, String)> = outcome
            .request
            .approvals
            .iter()
            .map(|approval| (approval.level, approval.approver_id.0.clone()))
            .collect();
        let dry_run: Vec<(u32, String)> =
            simulated.iter().map(|step| (step.level, step.approver_id.0.clone())).collect();
        assert_eq!(submitted, dry_run);

        // Simulation leaves no audit trail behind.
        let trail = service.audit_trail(&outcome.request.id).await.expect("trail");
        assert!(trail.iter().all(|event| event.correlation_id != "simulate"));
    }

    #[tokio::test]
    async fn sweep_escalates_only_stale_requests() {
        let service = service().await;
        let outcome = service.submit(submit_input()).await.expect("submit");
        let id = outcome.request.id.clone();

        let fresh = service.sweep(None, Utc::now()).await.expect("fresh sweep");
        assert!(fresh.escalated.is_empty());

        let later = Utc::now() + Duration::days(3);
        let report = service.sweep(None, later).await.expect("stale sweep");
        assert_eq!(report.escalated, vec![id.clone()]);

        let escalated = service.get(&id).await.expect("request");
        assert_eq!(
            escalated.pending_approval().map(|approval| approval.approver_id.0.as_str()),
            Some("hr1")
        );
    }

    #[tokio::test]
    async fn transitions_reach_the_notification_seam() {
        let notifier = Arc::new(InMemoryNotificationSink::default());
        let service = service_with(notifier.clone()).await;

        let outcome = service.submit(submit_input()).await.expect("submit");
        let id = outcome.request.id.clone();
        service
            .decide(&id, 1, &EmployeeId("s1".to_string()), Decision::Approve, None)
            .await
            .expect("decide");

        let later = Utc::now() + Duration::days(3);
        let report = service.sweep(None, later).await.expect("sweep");
        assert_eq!(report.escalated, vec![id.clone()]);

        let delivered = notifier.events();
        assert!(delivered.iter().any(|event| {
            event.recipient.0 == "s1" && event.kind == NotificationKind::AwaitingDecision
        }));
        assert!(delivered.iter().any(|event| {
            event.recipient.0 == "m1" && event.kind == NotificationKind::AwaitingDecision
        }));
        assert!(delivered.iter().any(|event| {
            event.request_id == id
                && event.recipient.0 == "hr1"
                && event.kind == NotificationKind::Escalated
        }));
    }

    #[tokio::test]
    async fn lost_decision_race_dispatches_nothing() {
        let notifier = Arc::new(InMemoryNotificationSink::default());
        let service = service_with(notifier.clone()).await;

        let outcome = service.submit(submit_input()).await.expect("submit");
        let id = outcome.request.id.clone();
        let submitted = notifier.events().len();

        service
            .decide(&id, 1, &EmployeeId("s1".to_string()), Decision::Approve, None)
            .await
            .expect("decide");
        let err = service
            .decide(&id, 1, &EmployeeId("s1".to_string()), Decision::Approve, None)
            .await
            .expect_err("level 1 already decided");
        assert!(matches!(err, ApplicationError::Domain(_)));

        // Exactly one decision got through, so exactly one hand-off followed
        // the submission notification.
        assert_eq!(notifier.events().len(), submitted + 1);
    }

    #[tokio::test]
    async fn pending_report_buckets_by_age() {
        let service = service().await;
        let outcome = service.submit(submit_input()).await.expect("submit");

        let later = Utc::now() + Duration::days(4);
        let report = service.pending_report(later).await.expect("report");
        assert_eq!(report.buckets.len(), 3);
        assert!(report.buckets[0].request_ids.contains(&outcome.request.id), "2+ days");
        assert!(report.buckets[1].request_ids.contains(&outcome.request.id), "3+ days");
        assert!(report.buckets[2].request_ids.is_empty(), "not yet 7 days");
    }

    #[tokio::test]
    async fn hr_manager_submission_settles_immediately() {
        let service = service().await;
        let outcome = service
            .submit(SubmitRequest {
                requester_id: "hr1".to_string(),
                ..submit_input()
            })
            .await
            .expect("submit");
        assert_eq!(outcome.request.status, LeaveStatus::Approved);
        assert!(outcome.request.approvals.is_empty());
        assert!(outcome
            .request
            .approvals
            .iter()
            .all(|approval| approval.level != HR_SENTINEL_LEVEL));
    }

    #[tokio::test]
    async fn rejected_dates_never_reach_the_store() {
        let service = service().await;
        let err = service
            .submit(SubmitRequest {
                start_date: NaiveDate::from_ymd_opt(2026, 9, 9).expect("date"),
                end_date: NaiveDate::from_ymd_opt(2026, 9, 7).expect("date"),
                ..submit_input()
            })
            .await
            .expect_err("inverted dates");
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::InvariantViolation(_))
        ));
    }
}
