use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;

use crate::error::FeederResult;
use crate::feeder::destination::{AccessControl, FolderRef};
use crate::feeder::directory::{Person, PrincipalKey};
use crate::feeder::warn::{self, WarnEvent};

/// Current members whose principals should hold access.
///
/// An empty or missing allow-list admits every member; otherwise a member
/// is admitted when any list entry matches their id, email or display name.
pub fn target_principals(
    members: &[Person],
    allow_list: Option<&[String]>,
    no_share: &BTreeSet<PrincipalKey>,
) -> BTreeSet<PrincipalKey> {
    let allow = allow_list.filter(|list| list.iter().any(|i| !i.trim().is_empty()));
    members
        .iter()
        .filter(|member| allow.is_none_or(|list| list.iter().any(|id| member.matches(id))))
        .filter(|member| !member.no_share)
        .filter_map(Person::principal)
        .filter(|key| !no_share.contains(key))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharePlan {
    /// Principal and whether the grant should notify them.
    pub grant: Vec<(PrincipalKey, bool)>,
    pub revoke: Vec<PrincipalKey>,
    pub unchanged: usize,
}

pub fn plan(
    target: &BTreeSet<PrincipalKey>,
    current: &BTreeSet<PrincipalKey>,
    no_notify: &BTreeSet<PrincipalKey>,
) -> SharePlan {
    SharePlan {
        grant: target
            .difference(current)
            .map(|key| (key.clone(), !no_notify.contains(key)))
            .collect(),
        revoke: current.difference(target).cloned().collect(),
        unchanged: target.intersection(current).count(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareOutcome {
    pub granted: Vec<PrincipalKey>,
    pub notified: usize,
    pub revoked: Vec<PrincipalKey>,
    pub unchanged: usize,
    pub failed: usize,
}

/// Inputs for one conversation's reconciliation.
#[derive(Debug, Clone, Copy)]
pub struct ShareRequest<'a> {
    pub conversation: &'a str,
    pub members: &'a [Person],
    pub no_share: &'a BTreeSet<PrincipalKey>,
    pub no_notify: &'a BTreeSet<PrincipalKey>,
    pub allow_list: Option<&'a [String]>,
}

pub struct MembershipSynchronizer {
    rate_limit_interval: usize,
    rate_limit_delay: Duration,
}

impl MembershipSynchronizer {
    pub fn new(rate_limit_interval: usize, rate_limit_delay: Duration) -> Self {
        Self {
            rate_limit_interval: rate_limit_interval.max(1),
            rate_limit_delay,
        }
    }

    fn pace(&self, calls: usize) {
        if calls > 0 && calls % self.rate_limit_interval == 0 && !self.rate_limit_delay.is_zero() {
            thread::sleep(self.rate_limit_delay);
        }
    }

    /// Bring the folder's grants in line with the target set.
    ///
    /// Reading current grants is the only failure that aborts; individual
    /// grant or revoke failures are counted and the rest still run. Auth
    /// failures always propagate.
    pub fn synchronize(
        &self,
        access: &mut dyn AccessControl,
        folder: &FolderRef,
        request: &ShareRequest<'_>,
    ) -> FeederResult<ShareOutcome> {
        let target = target_principals(request.members, request.allow_list, request.no_share);
        let current = access.list_principals(folder)?;
        let plan = plan(&target, &current, request.no_notify);

        let mut outcome = ShareOutcome {
            unchanged: plan.unchanged,
            ..ShareOutcome::default()
        };
        let mut calls = 0usize;

        for (principal, notify) in plan.grant {
            self.pace(calls);
            calls += 1;
            match access.grant(folder, &principal, notify) {
                Ok(()) => {
                    tracing::info!(conversation = request.conversation, principal = %principal, notify, "granted access");
                    if notify {
                        outcome.notified += 1;
                    }
                    outcome.granted.push(principal);
                }
                Err(err) if err.is_fatal_for_run() => return Err(err),
                Err(err) => {
                    outcome.failed += 1;
                    warn::emit(WarnEvent {
                        code: err.code().as_str(),
                        stage: "share-grant",
                        conversation: request.conversation,
                        action: "skip-principal",
                        reason: principal.as_str(),
                        err: &err.to_string(),
                    });
                }
            }
        }

        for principal in plan.revoke {
            self.pace(calls);
            calls += 1;
            match access.revoke(folder, &principal) {
                Ok(()) => {
                    tracing::info!(conversation = request.conversation, principal = %principal, "revoked access");
                    outcome.revoked.push(principal);
                }
                Err(err) if err.is_fatal_for_run() => return Err(err),
                Err(err) => {
                    outcome.failed += 1;
                    warn::emit(WarnEvent {
                        code: err.code().as_str(),
                        stage: "share-revoke",
                        conversation: request.conversation,
                        action: "skip-principal",
                        reason: principal.as_str(),
                        err: &err.to_string(),
                    });
                }
            }
        }

        Ok(outcome)
    }
}
