//! In-memory cloud provider
//!
//! Simulates the provider closely enough to exercise the orchestrators
//! without an account: resources have identifiers, long-running resources
//! move through their states one poll at a time, and deletions fail the way
//! the real services do when a dependency is still in place.

use crate::error::{CloudError, Result};
use crate::provider::{
    AuthStatus, BucketApi, CloudProvider, ComputeApi, DatabaseApi, DatabaseSpec, DbInstanceInfo,
    IdentityApi, IngressRule, IngressSource, InstanceInfo, InstanceProfileInfo, InstanceSpec,
    NetworkApi, RoleInfo,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;

const ACCOUNT_ID: &str = "000000000000";
const DEFAULT_VPC: &str = "vpc-0001";
const DEFAULT_SUBNETS: [&str; 2] = ["subnet-0001", "subnet-0002"];
const PUBLIC_IP: &str = "203.0.113.10";
const IMAGE_ID: &str = "ami-0memory000000001";

/// Knobs for simulating provider behavior
#[derive(Debug, Clone)]
pub struct MemoryBehavior {
    /// Answer of the caller-identity check
    pub authenticated: bool,

    /// Reject public bucket policies with AccessDenied
    pub reject_public_bucket_policy: bool,

    /// `create_role` stores the role but answers AlreadyExists, as when a
    /// concurrent or earlier run created it
    pub role_already_exists_on_create: bool,

    /// Polls before a new database becomes available; `None` never does
    pub database_ready_after: Option<u32>,

    /// Polls before a new instance is running
    pub instance_ready_after: u32,

    /// Polls a deleting database or terminating instance takes to disappear
    pub deletion_polls: u32,

    /// Operation names (e.g. `"delete_role"`) that fail with an API error
    pub failing_operations: HashSet<String>,
}

impl Default for MemoryBehavior {
    fn default() -> Self {
        Self {
            authenticated: true,
            reject_public_bucket_policy: false,
            role_already_exists_on_create: false,
            database_ready_after: Some(1),
            instance_ready_after: 1,
            deletion_polls: 1,
            failing_operations: HashSet::new(),
        }
    }
}

impl MemoryBehavior {
    pub fn failing(mut self, operation: &str) -> Self {
        self.failing_operations.insert(operation.to_string());
        self
    }
}

#[derive(Debug, Default)]
struct MemoryBucket {
    objects: BTreeMap<String, Vec<u8>>,
    public_access_blocked: bool,
    policy: Option<String>,
}

#[derive(Debug)]
struct MemoryRole {
    arn: String,
    policies: BTreeMap<String, String>,
}

#[derive(Debug)]
struct MemoryProfile {
    arn: String,
    roles: Vec<String>,
}

#[derive(Debug)]
struct MemoryGroup {
    vpc_id: String,
    name: String,
    rules: Vec<IngressRule>,
}

#[derive(Debug)]
struct MemoryDatabase {
    security_group: String,
    subnet_group: String,
    polls: u32,
    deleting: Option<u32>,
}

#[derive(Debug)]
struct MemoryInstance {
    name: String,
    security_group: String,
    user_data: String,
    polls: u32,
    terminating: Option<u32>,
    terminated: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u32,
    calls: Vec<String>,
    buckets: BTreeMap<String, MemoryBucket>,
    roles: BTreeMap<String, MemoryRole>,
    profiles: BTreeMap<String, MemoryProfile>,
    groups: BTreeMap<String, MemoryGroup>,
    subnet_groups: BTreeMap<String, Vec<String>>,
    databases: BTreeMap<String, MemoryDatabase>,
    instances: BTreeMap<String, MemoryInstance>,
}

impl MemoryState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", prefix, self.next_id)
    }

    fn group_in_use(&self, group_id: &str) -> Option<String> {
        if let Some((id, _)) = self.groups.iter().find(|(id, g)| {
            id.as_str() != group_id
                && g.rules
                    .iter()
                    .any(|r| r.source == IngressSource::SecurityGroup(group_id.to_string()))
        }) {
            return Some(format!("referenced by {}", id));
        }
        if let Some((id, _)) = self
            .instances
            .iter()
            .find(|(_, i)| !i.terminated && i.security_group == group_id)
        {
            return Some(format!("in use by {}", id));
        }
        self.databases
            .iter()
            .find(|(_, d)| d.security_group == group_id)
            .map(|(id, _)| format!("in use by {}", id))
    }
}

/// Simulated provider for tests and dry runs
pub struct MemoryProvider {
    region: String,
    behavior: MemoryBehavior,
    state: Mutex<MemoryState>,
}

impl MemoryProvider {
    pub fn new(region: impl Into<String>) -> Self {
        Self::with_behavior(region, MemoryBehavior::default())
    }

    pub fn with_behavior(region: impl Into<String>, behavior: MemoryBehavior) -> Self {
        Self {
            region: region.into(),
            behavior,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Record the call and fail it if configured to
    fn enter(&self, state: &mut MemoryState, operation: &str, target: &str) -> Result<()> {
        state.calls.push(format!("{}:{}", operation, target));
        if self.behavior.failing_operations.contains(operation) {
            return Err(CloudError::api(operation, "simulated failure"));
        }
        Ok(())
    }

    /// Every call so far, as `operation:target`
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    /// Number of calls to `operation`
    pub async fn call_count(&self, operation: &str) -> usize {
        let prefix = format!("{}:", operation);
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    pub async fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<()> {
        let mut state = self.state.lock().await;
        let b = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("bucket {}", bucket)))?;
        b.objects.insert(key.to_string(), body.to_vec());
        Ok(())
    }

    pub async fn bucket_names(&self) -> Vec<String> {
        self.state.lock().await.buckets.keys().cloned().collect()
    }

    pub async fn bucket_policy(&self, bucket: &str) -> Option<String> {
        let state = self.state.lock().await;
        state.buckets.get(bucket).and_then(|b| b.policy.clone())
    }

    pub async fn role_names(&self) -> Vec<String> {
        self.state.lock().await.roles.keys().cloned().collect()
    }

    pub async fn role_policy(&self, role: &str, policy_name: &str) -> Option<String> {
        let state = self.state.lock().await;
        state
            .roles
            .get(role)
            .and_then(|r| r.policies.get(policy_name).cloned())
    }

    pub async fn profile_names(&self) -> Vec<String> {
        self.state.lock().await.profiles.keys().cloned().collect()
    }

    pub async fn security_group_ids(&self) -> Vec<String> {
        self.state.lock().await.groups.keys().cloned().collect()
    }

    pub async fn ingress_rules(&self, group_id: &str) -> Vec<IngressRule> {
        let state = self.state.lock().await;
        state
            .groups
            .get(group_id)
            .map(|g| g.rules.clone())
            .unwrap_or_default()
    }

    pub async fn subnet_group_names(&self) -> Vec<String> {
        self.state.lock().await.subnet_groups.keys().cloned().collect()
    }

    pub async fn database_ids(&self) -> Vec<String> {
        self.state.lock().await.databases.keys().cloned().collect()
    }

    /// Instances that are not terminated
    pub async fn live_instance_ids(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .instances
            .iter()
            .filter(|(_, i)| !i.terminated)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn instance_user_data(&self, instance_id: &str) -> Option<String> {
        let state = self.state.lock().await;
        state
            .instances
            .get(instance_id)
            .map(|i| i.user_data.clone())
    }

    /// Whether nothing at all is left
    pub async fn is_empty(&self) -> bool {
        let state = self.state.lock().await;
        state.buckets.is_empty()
            && state.roles.is_empty()
            && state.profiles.is_empty()
            && state.groups.is_empty()
            && state.subnet_groups.is_empty()
            && state.databases.is_empty()
            && state.instances.values().all(|i| i.terminated)
    }
}

#[async_trait]
impl CloudProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "check_auth", &self.region)?;

        if self.behavior.authenticated {
            Ok(AuthStatus::ok(format!(
                "arn:aws:iam::{}:user/memory",
                ACCOUNT_ID
            )))
        } else {
            Ok(AuthStatus::failed("no credentials configured"))
        }
    }
}

#[async_trait]
impl BucketApi for MemoryProvider {
    async fn bucket_exists(&self, name: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "bucket_exists", name)?;
        Ok(state.buckets.contains_key(name))
    }

    async fn create_bucket(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "create_bucket", name)?;

        if state.buckets.contains_key(name) {
            return Err(CloudError::ResourceAlreadyExists(format!("bucket {}", name)));
        }
        state.buckets.insert(
            name.to_string(),
            MemoryBucket {
                public_access_blocked: true,
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn set_public_access_block(&self, name: &str, blocked: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "set_public_access_block", name)?;

        let bucket = state
            .buckets
            .get_mut(name)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("bucket {}", name)))?;
        bucket.public_access_blocked = blocked;
        Ok(())
    }

    async fn put_bucket_policy(&self, name: &str, policy: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "put_bucket_policy", name)?;

        if self.behavior.reject_public_bucket_policy {
            return Err(CloudError::AccessDenied(format!(
                "public policies are blocked for {}",
                name
            )));
        }

        let bucket = state
            .buckets
            .get_mut(name)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("bucket {}", name)))?;
        if bucket.public_access_blocked {
            return Err(CloudError::AccessDenied(format!(
                "public access block is on for {}",
                name
            )));
        }
        bucket.policy = Some(policy.to_string());
        Ok(())
    }

    async fn empty_bucket(&self, name: &str) -> Result<usize> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "empty_bucket", name)?;

        let bucket = state
            .buckets
            .get_mut(name)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("bucket {}", name)))?;
        let removed = bucket.objects.len();
        bucket.objects.clear();
        Ok(removed)
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "delete_bucket", name)?;

        match state.buckets.get(name) {
            None => Err(CloudError::ResourceNotFound(format!("bucket {}", name))),
            Some(b) if !b.objects.is_empty() => Err(CloudError::api(
                "delete_bucket",
                format!("BucketNotEmpty: {} still holds {} objects", name, b.objects.len()),
            )),
            Some(_) => {
                state.buckets.remove(name);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl IdentityApi for MemoryProvider {
    async fn get_role(&self, name: &str) -> Result<Option<RoleInfo>> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "get_role", name)?;

        Ok(state.roles.get(name).map(|r| RoleInfo {
            name: name.to_string(),
            arn: r.arn.clone(),
        }))
    }

    async fn create_role(&self, name: &str, _assume_role_policy: &str) -> Result<RoleInfo> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "create_role", name)?;

        if state.roles.contains_key(name) {
            return Err(CloudError::ResourceAlreadyExists(format!("role {}", name)));
        }

        let arn = format!("arn:aws:iam::{}:role/{}", ACCOUNT_ID, name);
        state.roles.insert(
            name.to_string(),
            MemoryRole {
                arn: arn.clone(),
                policies: BTreeMap::new(),
            },
        );

        if self.behavior.role_already_exists_on_create {
            return Err(CloudError::ResourceAlreadyExists(format!("role {}", name)));
        }

        Ok(RoleInfo {
            name: name.to_string(),
            arn,
        })
    }

    async fn put_role_policy(&self, role: &str, policy_name: &str, document: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "put_role_policy", role)?;

        let r = state
            .roles
            .get_mut(role)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("role {}", role)))?;
        r.policies
            .insert(policy_name.to_string(), document.to_string());
        Ok(())
    }

    async fn list_role_policies(&self, role: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "list_role_policies", role)?;

        state
            .roles
            .get(role)
            .map(|r| r.policies.keys().cloned().collect())
            .ok_or_else(|| CloudError::ResourceNotFound(format!("role {}", role)))
    }

    async fn delete_role_policy(&self, role: &str, policy_name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "delete_role_policy", role)?;

        let r = state
            .roles
            .get_mut(role)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("role {}", role)))?;
        r.policies
            .remove(policy_name)
            .map(|_| ())
            .ok_or_else(|| CloudError::ResourceNotFound(format!("policy {}", policy_name)))
    }

    async fn delete_role(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "delete_role", name)?;

        let Some(role) = state.roles.get(name) else {
            return Err(CloudError::ResourceNotFound(format!("role {}", name)));
        };
        if !role.policies.is_empty() {
            return Err(CloudError::api(
                "delete_role",
                format!("DeleteConflict: {} still has inline policies", name),
            ));
        }
        if state
            .profiles
            .values()
            .any(|p| p.roles.iter().any(|r| r == name))
        {
            return Err(CloudError::api(
                "delete_role",
                format!("DeleteConflict: {} is still attached to an instance profile", name),
            ));
        }

        state.roles.remove(name);
        Ok(())
    }

    async fn get_instance_profile(&self, name: &str) -> Result<Option<InstanceProfileInfo>> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "get_instance_profile", name)?;

        Ok(state.profiles.get(name).map(|p| InstanceProfileInfo {
            name: name.to_string(),
            arn: p.arn.clone(),
            roles: p.roles.clone(),
        }))
    }

    async fn create_instance_profile(&self, name: &str) -> Result<InstanceProfileInfo> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "create_instance_profile", name)?;

        if state.profiles.contains_key(name) {
            return Err(CloudError::ResourceAlreadyExists(format!(
                "instance profile {}",
                name
            )));
        }

        let arn = format!("arn:aws:iam::{}:instance-profile/{}", ACCOUNT_ID, name);
        state.profiles.insert(
            name.to_string(),
            MemoryProfile {
                arn: arn.clone(),
                roles: Vec::new(),
            },
        );
        Ok(InstanceProfileInfo {
            name: name.to_string(),
            arn,
            roles: Vec::new(),
        })
    }

    async fn add_role_to_instance_profile(&self, profile: &str, role: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "add_role_to_instance_profile", profile)?;

        if !state.roles.contains_key(role) {
            return Err(CloudError::ResourceNotFound(format!("role {}", role)));
        }
        let p = state
            .profiles
            .get_mut(profile)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("instance profile {}", profile)))?;
        if !p.roles.is_empty() {
            // Profiles hold a single role
            return Err(CloudError::ResourceAlreadyExists(format!(
                "instance profile {} already has a role",
                profile
            )));
        }
        p.roles.push(role.to_string());
        Ok(())
    }

    async fn remove_role_from_instance_profile(&self, profile: &str, role: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "remove_role_from_instance_profile", profile)?;

        let p = state
            .profiles
            .get_mut(profile)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("instance profile {}", profile)))?;
        let before = p.roles.len();
        p.roles.retain(|r| r != role);
        if p.roles.len() == before {
            return Err(CloudError::ResourceNotFound(format!(
                "role {} in instance profile {}",
                role, profile
            )));
        }
        Ok(())
    }

    async fn delete_instance_profile(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "delete_instance_profile", name)?;

        match state.profiles.get(name) {
            None => Err(CloudError::ResourceNotFound(format!(
                "instance profile {}",
                name
            ))),
            Some(p) if !p.roles.is_empty() => Err(CloudError::api(
                "delete_instance_profile",
                format!("DeleteConflict: {} still has roles", name),
            )),
            Some(_) => {
                state.profiles.remove(name);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl NetworkApi for MemoryProvider {
    async fn default_vpc_id(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "default_vpc_id", &self.region)?;
        Ok(DEFAULT_VPC.to_string())
    }

    async fn subnet_ids(&self, vpc_id: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "subnet_ids", vpc_id)?;

        if vpc_id != DEFAULT_VPC {
            return Err(CloudError::ResourceNotFound(format!("vpc {}", vpc_id)));
        }
        Ok(DEFAULT_SUBNETS.iter().map(|s| s.to_string()).collect())
    }

    async fn find_security_group(&self, vpc_id: &str, name: &str) -> Result<Option<String>> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "find_security_group", name)?;

        Ok(state
            .groups
            .iter()
            .find(|(_, g)| g.vpc_id == vpc_id && g.name == name)
            .map(|(id, _)| id.clone()))
    }

    async fn security_group_exists(&self, group_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "security_group_exists", group_id)?;
        Ok(state.groups.contains_key(group_id))
    }

    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        _description: &str,
    ) -> Result<String> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "create_security_group", name)?;

        if state
            .groups
            .values()
            .any(|g| g.vpc_id == vpc_id && g.name == name)
        {
            return Err(CloudError::ResourceAlreadyExists(format!(
                "security group {}",
                name
            )));
        }

        let id = state.next_id("sg");
        state.groups.insert(
            id.clone(),
            MemoryGroup {
                vpc_id: vpc_id.to_string(),
                name: name.to_string(),
                rules: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn authorize_ingress(&self, group_id: &str, rule: &IngressRule) -> Result<()> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "authorize_ingress", group_id)?;

        if let IngressSource::SecurityGroup(source) = &rule.source {
            if !state.groups.contains_key(source) {
                return Err(CloudError::ResourceNotFound(format!(
                    "security group {}",
                    source
                )));
            }
        }

        let group = state
            .groups
            .get_mut(group_id)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("security group {}", group_id)))?;
        if group.rules.contains(rule) {
            return Err(CloudError::ResourceAlreadyExists(format!(
                "ingress rule on port {} for {}",
                rule.port, group_id
            )));
        }
        group.rules.push(rule.clone());
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "delete_security_group", group_id)?;

        if !state.groups.contains_key(group_id) {
            return Err(CloudError::ResourceNotFound(format!(
                "security group {}",
                group_id
            )));
        }
        if let Some(reason) = state.group_in_use(group_id) {
            return Err(CloudError::api(
                "delete_security_group",
                format!("DependencyViolation: {} is {}", group_id, reason),
            ));
        }

        state.groups.remove(group_id);
        Ok(())
    }
}

#[async_trait]
impl DatabaseApi for MemoryProvider {
    async fn db_subnet_group_exists(&self, name: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "db_subnet_group_exists", name)?;
        Ok(state.subnet_groups.contains_key(name))
    }

    async fn create_db_subnet_group(&self, name: &str, subnet_ids: &[String]) -> Result<()> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "create_db_subnet_group", name)?;

        if state.subnet_groups.contains_key(name) {
            return Err(CloudError::ResourceAlreadyExists(format!(
                "db subnet group {}",
                name
            )));
        }
        if subnet_ids.len() < 2 {
            return Err(CloudError::api(
                "create_db_subnet_group",
                "DBSubnetGroupDoesNotCoverEnoughAZs",
            ));
        }
        state
            .subnet_groups
            .insert(name.to_string(), subnet_ids.to_vec());
        Ok(())
    }

    async fn delete_db_subnet_group(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "delete_db_subnet_group", name)?;

        if !state.subnet_groups.contains_key(name) {
            return Err(CloudError::ResourceNotFound(format!(
                "db subnet group {}",
                name
            )));
        }
        if let Some(id) = state
            .databases
            .iter()
            .find(|(_, d)| d.subnet_group == name)
            .map(|(id, _)| id.clone())
        {
            return Err(CloudError::api(
                "delete_db_subnet_group",
                format!("InvalidDBSubnetGroupStateFault: {} is in use by {}", name, id),
            ));
        }

        state.subnet_groups.remove(name);
        Ok(())
    }

    async fn describe_db_instance(&self, identifier: &str) -> Result<Option<DbInstanceInfo>> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "describe_db_instance", identifier)?;

        let deletion_polls = self.behavior.deletion_polls;
        let ready_after = self.behavior.database_ready_after;

        let Some(db) = state.databases.get_mut(identifier) else {
            return Ok(None);
        };

        let info = if let Some(polls) = db.deleting.as_mut() {
            *polls += 1;
            if *polls > deletion_polls {
                state.databases.remove(identifier);
                return Ok(None);
            }
            DbInstanceInfo {
                identifier: identifier.to_string(),
                status: "deleting".to_string(),
                endpoint: None,
            }
        } else {
            db.polls += 1;
            let available = ready_after.is_some_and(|n| db.polls >= n);
            DbInstanceInfo {
                identifier: identifier.to_string(),
                status: if available { "available" } else { "creating" }.to_string(),
                endpoint: available.then(|| format!("{}.memory.rds.local", identifier)),
            }
        };
        Ok(Some(info))
    }

    async fn create_db_instance(&self, spec: &DatabaseSpec) -> Result<()> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "create_db_instance", &spec.identifier)?;

        if state.databases.contains_key(&spec.identifier) {
            return Err(CloudError::ResourceAlreadyExists(format!(
                "database {}",
                spec.identifier
            )));
        }
        if !state.subnet_groups.contains_key(&spec.subnet_group) {
            return Err(CloudError::ResourceNotFound(format!(
                "db subnet group {}",
                spec.subnet_group
            )));
        }
        if !state.groups.contains_key(&spec.security_group_id) {
            return Err(CloudError::ResourceNotFound(format!(
                "security group {}",
                spec.security_group_id
            )));
        }

        state.databases.insert(
            spec.identifier.clone(),
            MemoryDatabase {
                security_group: spec.security_group_id.clone(),
                subnet_group: spec.subnet_group.clone(),
                polls: 0,
                deleting: None,
            },
        );
        Ok(())
    }

    async fn delete_db_instance(&self, identifier: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "delete_db_instance", identifier)?;

        let db = state
            .databases
            .get_mut(identifier)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("database {}", identifier)))?;
        if db.deleting.is_some() {
            return Err(CloudError::api(
                "delete_db_instance",
                format!("InvalidDBInstanceState: {} is already being deleted", identifier),
            ));
        }
        db.deleting = Some(0);
        Ok(())
    }
}

#[async_trait]
impl ComputeApi for MemoryProvider {
    async fn latest_image_id(&self, owner: &str, name_filter: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "latest_image_id", name_filter)?;

        if owner.is_empty() || name_filter.is_empty() {
            return Err(CloudError::ResourceNotFound(format!(
                "image matching '{}'",
                name_filter
            )));
        }
        Ok(IMAGE_ID.to_string())
    }

    async fn find_instance_by_name(&self, name: &str) -> Result<Option<InstanceInfo>> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "find_instance_by_name", name)?;

        Ok(state
            .instances
            .iter()
            .find(|(_, i)| i.name == name && !i.terminated)
            .map(|(id, i)| InstanceInfo {
                id: id.clone(),
                state: if i.terminating.is_some() {
                    "shutting-down"
                } else {
                    "pending"
                }
                .to_string(),
                public_ip: None,
            }))
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<Option<InstanceInfo>> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "describe_instance", instance_id)?;

        let deletion_polls = self.behavior.deletion_polls;
        let ready_after = self.behavior.instance_ready_after;

        let Some(instance) = state.instances.get_mut(instance_id) else {
            return Ok(None);
        };

        let (name, public_ip) = if instance.terminated {
            ("terminated", None)
        } else if let Some(polls) = instance.terminating.as_mut() {
            *polls += 1;
            if *polls > deletion_polls {
                instance.terminated = true;
                ("terminated", None)
            } else {
                ("shutting-down", None)
            }
        } else {
            instance.polls += 1;
            if instance.polls >= ready_after {
                ("running", Some(PUBLIC_IP.to_string()))
            } else {
                ("pending", None)
            }
        };

        Ok(Some(InstanceInfo {
            id: instance_id.to_string(),
            state: name.to_string(),
            public_ip,
        }))
    }

    async fn run_instance(&self, spec: &InstanceSpec) -> Result<String> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "run_instance", &spec.name)?;

        if !state.groups.contains_key(&spec.security_group_id) {
            return Err(CloudError::ResourceNotFound(format!(
                "security group {}",
                spec.security_group_id
            )));
        }
        if !state.profiles.contains_key(&spec.instance_profile) {
            return Err(CloudError::ResourceNotFound(format!(
                "instance profile {}",
                spec.instance_profile
            )));
        }

        let id = state.next_id("i");
        state.instances.insert(
            id.clone(),
            MemoryInstance {
                name: spec.name.clone(),
                security_group: spec.security_group_id.clone(),
                user_data: spec.user_data.clone(),
                polls: 0,
                terminating: None,
                terminated: false,
            },
        );
        Ok(id)
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.enter(&mut state, "terminate_instance", instance_id)?;

        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("instance {}", instance_id)))?;
        if !instance.terminated && instance.terminating.is_none() {
            instance.terminating = Some(0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bucket_not_empty_blocks_delete() {
        let provider = MemoryProvider::new("us-east-1");
        provider.create_bucket("b").await.unwrap();
        provider.put_object("b", "index.html", b"hi").await.unwrap();

        assert!(provider.delete_bucket("b").await.is_err());
        assert_eq!(provider.empty_bucket("b").await.unwrap(), 1);
        provider.delete_bucket("b").await.unwrap();
        assert!(provider.delete_bucket("b").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_referenced_group_cannot_be_deleted() {
        let provider = MemoryProvider::new("us-east-1");
        let web = provider
            .create_security_group(DEFAULT_VPC, "web", "web")
            .await
            .unwrap();
        let db = provider
            .create_security_group(DEFAULT_VPC, "db", "db")
            .await
            .unwrap();
        provider
            .authorize_ingress(&db, &IngressRule::from_group(5432, web.clone()))
            .await
            .unwrap();

        assert!(provider.delete_security_group(&web).await.is_err());
        provider.delete_security_group(&db).await.unwrap();
        provider.delete_security_group(&web).await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_operation() {
        let provider = MemoryProvider::with_behavior(
            "us-east-1",
            MemoryBehavior::default().failing("create_bucket"),
        );
        let err = provider.create_bucket("b").await.unwrap_err();
        assert!(matches!(err, CloudError::ApiError { .. }));
        assert_eq!(provider.call_count("create_bucket").await, 1);
    }
}
