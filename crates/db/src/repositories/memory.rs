use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use kahawa_core::audit::AuditEvent;
use kahawa_core::domain::archive::ArchivedRequest;
use kahawa_core::domain::employee::{normalize_identity, Employee, EmployeeId};
use kahawa_core::domain::notification::NotificationJob;
use kahawa_core::domain::request::{FundsRequest, RequestFilter, RequestId};
use kahawa_core::domain::verification::{VerificationCode, VerificationRecord};

use super::{
    ArchiveRepository, AuditRepository, EmployeeRepository, OutboxRepository, RepositoryError,
    RequestRepository, VerificationRepository,
};

#[derive(Default)]
pub struct InMemoryRequestRepository {
    requests: RwLock<HashMap<String, FundsRequest>>,
}

#[async_trait::async_trait]
impl RequestRepository for InMemoryRequestRepository {
    async fn insert(&self, request: &FundsRequest) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(request.id.as_str()) {
            return Err(RepositoryError::Duplicate { entity: "request", id: request.id.to_string() });
        }
        requests.insert(request.id.0.clone(), request.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &RequestId) -> Result<Option<FundsRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.get(id.as_str()).cloned())
    }

    async fn list(&self, filter: &RequestFilter) -> Result<Vec<FundsRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        let mut matching: Vec<FundsRequest> =
            requests.values().filter(|request| filter.matches(request)).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
        if let Some(limit) = filter.limit {
            matching.truncate(limit as usize);
        }
        Ok(matching)
    }

    async fn update(&self, mut request: FundsRequest) -> Result<FundsRequest, RepositoryError> {
        let mut requests = self.requests.write().await;
        match requests.get(request.id.as_str()) {
            Some(stored) if stored.version == request.version => {
                request.version += 1;
                requests.insert(request.id.0.clone(), request.clone());
                Ok(request)
            }
            _ => Err(RepositoryError::Conflict {
                entity: "request",
                id: request.id.to_string(),
                expected_version: request.version,
            }),
        }
    }

    async fn delete(&self, id: &RequestId) -> Result<bool, RepositoryError> {
        let mut requests = self.requests.write().await;
        Ok(requests.remove(id.as_str()).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryEmployeeRepository {
    employees: RwLock<HashMap<String, Employee>>,
}

#[async_trait::async_trait]
impl EmployeeRepository for InMemoryEmployeeRepository {
    async fn find_by_id(&self, id: &EmployeeId) -> Result<Option<Employee>, RepositoryError> {
        let employees = self.employees.read().await;
        Ok(employees.get(&id.0).cloned())
    }

    async fn find_by_identity(&self, identity: &str) -> Result<Option<Employee>, RepositoryError> {
        let identity = normalize_identity(identity);
        let employees = self.employees.read().await;
        Ok(employees.values().find(|employee| employee.identity() == identity).cloned())
    }

    async fn list(&self) -> Result<Vec<Employee>, RepositoryError> {
        let employees = self.employees.read().await;
        let mut all: Vec<Employee> = employees.values().cloned().collect();
        all.sort_by(|a, b| a.full_name.cmp(&b.full_name).then_with(|| a.email.cmp(&b.email)));
        Ok(all)
    }

    async fn save(&self, employee: Employee) -> Result<(), RepositoryError> {
        let mut employees = self.employees.write().await;
        let identity = employee.identity();
        if employees.values().any(|other| other.id != employee.id && other.identity() == identity)
        {
            return Err(RepositoryError::Duplicate { entity: "employee email", id: identity });
        }
        employees.insert(employee.id.0.clone(), employee);
        Ok(())
    }
}

/// Shares the request map so archiving can remove the live copy.
pub struct InMemoryArchiveRepository {
    archived: RwLock<HashMap<String, ArchivedRequest>>,
    requests: std::sync::Arc<InMemoryRequestRepository>,
}

impl InMemoryArchiveRepository {
    pub fn new(requests: std::sync::Arc<InMemoryRequestRepository>) -> Self {
        Self { archived: RwLock::default(), requests }
    }
}

#[async_trait::async_trait]
impl ArchiveRepository for InMemoryArchiveRepository {
    async fn archive(
        &self,
        archived: &ArchivedRequest,
        remove_original: bool,
    ) -> Result<(), RepositoryError> {
        let mut rows = self.archived.write().await;
        if rows.contains_key(archived.request_id.as_str()) {
            return Err(RepositoryError::Duplicate {
                entity: "archived request",
                id: archived.request_id.to_string(),
            });
        }
        rows.insert(archived.request_id.0.clone(), archived.clone());
        if remove_original {
            self.requests.delete(&archived.request_id).await?;
        }
        Ok(())
    }

    async fn find(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<ArchivedRequest>, RepositoryError> {
        let rows = self.archived.read().await;
        Ok(rows.get(request_id.as_str()).cloned())
    }

    async fn list(&self) -> Result<Vec<ArchivedRequest>, RepositoryError> {
        let rows = self.archived.read().await;
        let mut all: Vec<ArchivedRequest> = rows.values().cloned().collect();
        all.sort_by(|a, b| b.archived_at.cmp(&a.archived_at));
        Ok(all)
    }
}

#[derive(Default)]
pub struct InMemoryOutboxRepository {
    jobs: RwLock<Vec<NotificationJob>>,
}

#[async_trait::async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn enqueue(&self, jobs: &[NotificationJob]) -> Result<(), RepositoryError> {
        let mut stored = self.jobs.write().await;
        stored.extend(jobs.iter().cloned());
        Ok(())
    }

    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<NotificationJob>, RepositoryError> {
        let stored = self.jobs.read().await;
        let mut due: Vec<NotificationJob> =
            stored.iter().filter(|job| job.is_due(now)).cloned().collect();
        due.sort_by(|a, b| {
            a.available_at.cmp(&b.available_at).then_with(|| a.created_at.cmp(&b.created_at))
        });
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn save(&self, job: &NotificationJob) -> Result<(), RepositoryError> {
        let mut stored = self.jobs.write().await;
        match stored.iter_mut().find(|existing| existing.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => stored.push(job.clone()),
        }
        Ok(())
    }

    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<NotificationJob>, RepositoryError> {
        let stored = self.jobs.read().await;
        Ok(stored.iter().filter(|job| &job.request_id == request_id).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryVerificationRepository {
    records: RwLock<HashMap<String, VerificationRecord>>,
}

#[async_trait::async_trait]
impl VerificationRepository for InMemoryVerificationRepository {
    async fn insert(&self, record: &VerificationRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        if records.contains_key(record.code.as_str()) {
            return Err(RepositoryError::Duplicate {
                entity: "verification code",
                id: record.code.as_str().to_owned(),
            });
        }
        records.insert(record.code.0.clone(), record.clone());
        Ok(())
    }

    async fn find(
        &self,
        code: &VerificationCode,
    ) -> Result<Option<VerificationRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.get(code.as_str()).cloned())
    }

    async fn save(&self, record: &VerificationRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get_mut(record.code.as_str()) {
            *existing = record.clone();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAuditRepository {
    events: RwLock<Vec<AuditEvent>>,
}

#[async_trait::async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|event| event.request_id.as_ref() == Some(request_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use kahawa_core::domain::archive::ArchivedRequest;
    use kahawa_core::domain::employee::{NewEmployee, EmployeeStatus};
    use kahawa_core::domain::notification::NotificationJob;
    use kahawa_core::domain::request::{FundsRequest, NewRequest, Priority, RequestKind};

    use crate::repositories::{
        ArchiveRepository, EmployeeRepository, InMemoryArchiveRepository,
        InMemoryEmployeeRepository, InMemoryOutboxRepository, InMemoryRequestRepository,
        OutboxRepository, RepositoryError, RequestRepository,
    };

    fn request() -> FundsRequest {
        NewRequest {
            kind: RequestKind::Money,
            title: "Fuel for collection truck".to_owned(),
            description: String::new(),
            amount: Decimal::new(180_000, 0),
            requester: "joel@kahawa.test".to_owned(),
            requester_name: "Joel".to_owned(),
            department: "Logistics".to_owned(),
            priority: Priority::Urgent,
            details: None,
        }
        .into_request(Utc::now())
        .expect("valid request")
    }

    #[tokio::test]
    async fn in_memory_request_repo_enforces_versions() {
        let repo = InMemoryRequestRepository::default();
        let request = request();
        repo.insert(&request).await.expect("insert");

        let saved = repo.update(request.clone()).await.expect("update");
        assert_eq!(saved.version, 1);

        let stale = repo.update(request.clone()).await.expect_err("stale");
        assert!(matches!(stale, RepositoryError::Conflict { expected_version: 0, .. }));
        assert_eq!(repo.find_by_id(&request.id).await.expect("find"), Some(saved));
    }

    #[tokio::test]
    async fn in_memory_employee_repo_looks_up_by_identity() {
        let repo = InMemoryEmployeeRepository::default();
        let employee = NewEmployee {
            full_name: "Brian Okello".to_owned(),
            email: "Brian@Kahawa.test".to_owned(),
            phone: Some("0781121639".to_owned()),
            role: "finance_manager".to_owned(),
            department: "Finance".to_owned(),
            permissions: Vec::new(),
            status: EmployeeStatus::Active,
        }
        .into_employee(Utc::now())
        .expect("valid employee");

        repo.save(employee.clone()).await.expect("save");
        assert_eq!(
            repo.find_by_identity(" brian@kahawa.TEST").await.expect("find"),
            Some(employee.clone())
        );

        let mut clone = employee.clone();
        clone.id = kahawa_core::domain::employee::EmployeeId::generate();
        assert!(matches!(
            repo.save(clone).await,
            Err(RepositoryError::Duplicate { .. })
        ));
    }

    #[tokio::test]
    async fn in_memory_archive_removes_live_request() {
        let requests = Arc::new(InMemoryRequestRepository::default());
        let archive = InMemoryArchiveRepository::new(requests.clone());
        let mut request = request();
        request.record_rejection("carol@kahawa.test", "not budgeted", Utc::now());
        requests.insert(&request).await.expect("insert");

        let archived =
            ArchivedRequest::from_request(&request, "carol@kahawa.test", Utc::now()).expect("ok");
        archive.archive(&archived, true).await.expect("archive");

        assert_eq!(requests.find_by_id(&request.id).await.expect("find"), None);
        assert_eq!(archive.find(&request.id).await.expect("find"), Some(archived));
    }

    #[tokio::test]
    async fn in_memory_outbox_orders_due_jobs() {
        let repo = InMemoryOutboxRepository::default();
        let now = Utc::now();
        let request = request();
        let mut late = NotificationJob::queued(request.id.clone(), "a", "+256700000001", "m", 3, now);
        late.available_at = now + Duration::seconds(5);
        let early = NotificationJob::queued(request.id.clone(), "b", "+256700000002", "m", 3, now);

        repo.enqueue(&[late.clone(), early.clone()]).await.expect("enqueue");
        assert_eq!(repo.due(now, 10).await.expect("due"), vec![early.clone()]);
        assert_eq!(
            repo.due(now + Duration::seconds(5), 10).await.expect("due"),
            vec![early.clone(), late.clone()]
        );

        let mut sent = early.clone();
        sent.mark_sent(now);
        repo.save(&sent).await.expect("save");
        assert_eq!(repo.due(now + Duration::seconds(5), 10).await.expect("due"), vec![late]);
    }
}
