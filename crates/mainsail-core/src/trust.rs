//! Authentication decisions for verified bundles.
//!
//! A signer is recognised when at least [`QUORUM`] mirrors serve the same
//! profile for the embedded public key, that profile is active, and the
//! local trust store holds an identical copy. Anything short of that is
//! either quarantined outright or handed back to the user to decide.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::bundle::Bundle;
use crate::config::ConfigStore;
use crate::error::{Error, Result};
use crate::mirror::{MirrorError, ProfileMirror};
use crate::profile::Profile;
use crate::signing;

/// Identical responses needed out of the configured mirrors.
pub const QUORUM: usize = 2;

// ── Tally ───────────────────────────────────────────────────────────────────

/// Identical response bodies counted in the order they were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileTally {
    counts: Vec<(String, usize)>,
}

impl ProfileTally {
    /// `None` entries are mirrors that gave no usable answer.
    pub fn from_responses<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = Option<String>>,
    {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for text in responses.into_iter().flatten() {
            match counts.iter_mut().find(|(seen, _)| *seen == text) {
                Some((_, n)) => *n += 1,
                None => counts.push((text, 1)),
            }
        }
        Self { counts }
    }

    pub fn found(&self) -> bool {
        !self.counts.is_empty()
    }

    /// Most common response; ties go to the one seen first.
    pub fn leader(&self) -> Option<(&str, usize)> {
        let mut best: Option<(&str, usize)> = None;
        for (text, n) in &self.counts {
            if best.map_or(true, |(_, top)| *n > top) {
                best = Some((text.as_str(), *n));
            }
        }
        best
    }

    pub fn agreement(&self) -> bool {
        self.leader().is_some_and(|(_, n)| n >= QUORUM)
    }
}

/// Error payloads and bodies that are not a profile count as no response.
pub fn accept_response(response: std::result::Result<String, MirrorError>) -> Option<String> {
    let text = response.ok()?;
    if text.to_lowercase().contains("error") {
        return None;
    }
    Profile::parse(&text).ok().map(|_| text)
}

// ── Verdicts ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Checks {
    pub verified: bool,
    pub found: bool,
    pub agreement: bool,
    pub active: bool,
    pub in_trusted: bool,
    pub changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineReason {
    SignatureInvalid,
    ProfileNotFound,
    NoQuorum,
    KeyInactive,
}

impl QuarantineReason {
    pub fn advisory(&self) -> &'static str {
        match self {
            QuarantineReason::SignatureInvalid => {
                "The signature does not match the document. Do not trust it."
            }
            QuarantineReason::ProfileNotFound => {
                "No mirror has a profile for this public key."
            }
            QuarantineReason::NoQuorum => {
                "The mirrors disagree about the profile for this public key."
            }
            QuarantineReason::KeyInactive => {
                "This public key is no longer active. The signer may have rotated keys."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingReason {
    /// The signer is not in the trust store.
    NotTrusted,
    /// The signer is trusted but the mirrors now serve a different profile.
    ProfileChanged,
}

impl PendingReason {
    pub fn choices(&self) -> &'static [ReviewChoice] {
        match self {
            PendingReason::NotTrusted => &[
                ReviewChoice::Quarantine,
                ReviewChoice::Authenticate,
                ReviewChoice::AuthenticateAndTrust,
            ],
            PendingReason::ProfileChanged => &[
                ReviewChoice::Quarantine,
                ReviewChoice::AuthenticateAndRemoveTrust,
                ReviewChoice::AuthenticateAndUpdateTrust,
                ReviewChoice::Authenticate,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    Quarantine(QuarantineReason),
    Authenticated,
    Pending(PendingReason),
}

impl Verdict {
    pub fn allowed_choices(&self) -> &'static [ReviewChoice] {
        match self {
            Verdict::Quarantine(_) => &[ReviewChoice::Quarantine],
            Verdict::Authenticated => &[ReviewChoice::Authenticate, ReviewChoice::Quarantine],
            Verdict::Pending(reason) => reason.choices(),
        }
    }

    /// The action taken without asking, if any.
    pub fn automatic_choice(&self) -> Option<ReviewChoice> {
        match self {
            Verdict::Quarantine(_) => Some(ReviewChoice::Quarantine),
            Verdict::Authenticated => Some(ReviewChoice::Authenticate),
            Verdict::Pending(_) => None,
        }
    }
}

/// Pure decision table. Inactivity is checked before trust, so an inactive
/// key is quarantined even when its trusted profile also changed.
pub fn decide(checks: &Checks) -> Verdict {
    if !checks.verified {
        Verdict::Quarantine(QuarantineReason::SignatureInvalid)
    } else if !checks.found {
        Verdict::Quarantine(QuarantineReason::ProfileNotFound)
    } else if !checks.agreement {
        Verdict::Quarantine(QuarantineReason::NoQuorum)
    } else if !checks.active {
        Verdict::Quarantine(QuarantineReason::KeyInactive)
    } else if checks.in_trusted && !checks.changed {
        Verdict::Authenticated
    } else if checks.in_trusted {
        Verdict::Pending(PendingReason::ProfileChanged)
    } else {
        Verdict::Pending(PendingReason::NotTrusted)
    }
}

// ── Choices ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewChoice {
    Quarantine,
    Authenticate,
    AuthenticateAndTrust,
    AuthenticateAndUpdateTrust,
    AuthenticateAndRemoveTrust,
}

impl ReviewChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewChoice::Quarantine => "quarantine",
            ReviewChoice::Authenticate => "authenticate",
            ReviewChoice::AuthenticateAndTrust => "authenticate-and-trust",
            ReviewChoice::AuthenticateAndUpdateTrust => "authenticate-and-update-trust",
            ReviewChoice::AuthenticateAndRemoveTrust => "authenticate-and-remove-trust",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReviewChoice::Quarantine => "Move to Quarantine",
            ReviewChoice::Authenticate => "Move to Authenticated",
            ReviewChoice::AuthenticateAndTrust => {
                "Move to Authenticated, always trust this person"
            }
            ReviewChoice::AuthenticateAndUpdateTrust => {
                "Move to Authenticated, update trusted signers"
            }
            ReviewChoice::AuthenticateAndRemoveTrust => {
                "Move to Authenticated, remove from trusted signers"
            }
        }
    }

    pub fn authenticates(&self) -> bool {
        !matches!(self, ReviewChoice::Quarantine)
    }
}

impl fmt::Display for ReviewChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewChoice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        [
            ReviewChoice::Quarantine,
            ReviewChoice::Authenticate,
            ReviewChoice::AuthenticateAndTrust,
            ReviewChoice::AuthenticateAndUpdateTrust,
            ReviewChoice::AuthenticateAndRemoveTrust,
        ]
        .into_iter()
        .find(|c| c.as_str() == s)
        .ok_or_else(|| Error::ChoiceNotAllowed(format!("unknown choice '{s}'")))
    }
}

// ── Verifier ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment {
    pub public_key: String,
    pub verdict: Verdict,
    pub checks: Checks,
    /// The quorum profile, when one was found.
    pub profile: Option<Profile>,
}

pub struct TrustVerifier {
    store: Arc<ConfigStore>,
    mirrors: Vec<Arc<dyn ProfileMirror>>,
    timeout: Duration,
}

impl TrustVerifier {
    pub fn new(
        store: Arc<ConfigStore>,
        mirrors: Vec<Arc<dyn ProfileMirror>>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            mirrors,
            timeout,
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Queries every mirror at once. The result has one entry per mirror, in
    /// configuration order; a mirror past its deadline is `Timeout`.
    pub async fn fetch_profiles(
        &self,
        public_key: &str,
    ) -> Vec<std::result::Result<String, MirrorError>> {
        let mut tasks = JoinSet::new();
        for (idx, mirror) in self.mirrors.iter().enumerate() {
            let mirror = Arc::clone(mirror);
            let key = public_key.to_owned();
            let limit = self.timeout;
            tasks.spawn(async move {
                let res = match tokio::time::timeout(limit, mirror.fetch(&key)).await {
                    Ok(res) => res,
                    Err(_) => Err(MirrorError::Timeout),
                };
                if let Err(e) = &res {
                    debug!(mirror = mirror.name(), error = %e, "no profile from mirror");
                }
                (idx, res)
            });
        }

        let mut out = vec![Err(MirrorError::Timeout); self.mirrors.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, res)) => out[idx] = res,
                Err(e) => warn!(error = %e, "mirror task failed"),
            }
        }
        out
    }

    pub async fn review(&self, bundle: &Bundle) -> Result<Assessment> {
        let public_key = bundle.public_key.clone();
        let mut checks = Checks {
            verified: signing::verify(bundle),
            ..Checks::default()
        };
        if !checks.verified {
            info!(public_key = %public_key, "signature invalid");
            return Ok(Assessment {
                public_key,
                verdict: decide(&checks),
                checks,
                profile: None,
            });
        }

        let responses = self.fetch_profiles(&public_key).await;
        let tally = ProfileTally::from_responses(responses.into_iter().map(accept_response));
        checks.found = tally.found();
        checks.agreement = tally.agreement();

        let profile = match tally.leader() {
            Some((text, _)) => Some(Profile::parse(text)?),
            None => None,
        };
        if let Some(profile) = &profile {
            checks.active = profile.is_active();
            let trusted = self.store.trusted_profile(&public_key)?;
            checks.in_trusted = trusted.is_some();
            checks.changed = trusted.is_some_and(|t| t != *profile);
        }

        let verdict = decide(&checks);
        info!(public_key = %public_key, ?verdict, "bundle reviewed");
        Ok(Assessment {
            public_key,
            verdict,
            checks,
            profile,
        })
    }

    pub fn commit_trust(&self, public_key: &str, profile: Profile) -> Result<()> {
        self.store.commit_trust(public_key, profile)
    }

    pub fn revoke_trust(&self, public_key: &str) -> Result<bool> {
        self.store.revoke_trust(public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn two_of_three_agree() {
        let t = ProfileTally::from_responses([some("A"), some("A"), some("B")]);
        assert!(t.found());
        assert!(t.agreement());
        assert_eq!(t.leader(), Some(("A", 2)));
    }

    #[test]
    fn all_different_is_no_quorum() {
        let t = ProfileTally::from_responses([some("A"), some("B"), some("C")]);
        assert!(t.found());
        assert!(!t.agreement());
        assert_eq!(t.leader(), Some(("A", 1)));
    }

    #[test]
    fn one_timeout_still_agrees() {
        let t = ProfileTally::from_responses([some("A"), None, some("A")]);
        assert!(t.agreement());
    }

    #[test]
    fn nothing_found() {
        let t = ProfileTally::from_responses([None, None, None]);
        assert!(!t.found());
        assert!(!t.agreement());
        assert_eq!(t.leader(), None);
    }

    #[test]
    fn error_payloads_are_not_responses() {
        let body = "[Public_key]\nActive = true\n".to_string();
        assert_eq!(accept_response(Ok(body.clone())), Some(body));
        assert_eq!(
            accept_response(Ok("<Error><Code>NoSuchKey</Code></Error>".into())),
            None
        );
        assert_eq!(accept_response(Ok("not a profile".into())), None);
        assert_eq!(accept_response(Err(MirrorError::Timeout)), None);
    }

    fn trusted_good() -> Checks {
        Checks {
            verified: true,
            found: true,
            agreement: true,
            active: true,
            in_trusted: true,
            changed: false,
        }
    }

    #[test]
    fn decision_precedence() {
        assert_eq!(decide(&trusted_good()), Verdict::Authenticated);

        let c = Checks {
            in_trusted: false,
            ..trusted_good()
        };
        assert_eq!(decide(&c), Verdict::Pending(PendingReason::NotTrusted));

        let c = Checks {
            changed: true,
            ..trusted_good()
        };
        assert_eq!(decide(&c), Verdict::Pending(PendingReason::ProfileChanged));

        let c = Checks {
            active: false,
            changed: true,
            ..trusted_good()
        };
        assert_eq!(
            decide(&c),
            Verdict::Quarantine(QuarantineReason::KeyInactive)
        );

        let c = Checks {
            agreement: false,
            active: false,
            ..trusted_good()
        };
        assert_eq!(decide(&c), Verdict::Quarantine(QuarantineReason::NoQuorum));

        let c = Checks {
            verified: false,
            ..trusted_good()
        };
        assert_eq!(
            decide(&c),
            Verdict::Quarantine(QuarantineReason::SignatureInvalid)
        );
    }

    #[test]
    fn choices_parse_by_name() {
        for choice in Verdict::Pending(PendingReason::ProfileChanged).allowed_choices() {
            assert_eq!(choice.as_str().parse::<ReviewChoice>().unwrap(), *choice);
        }
        assert!("trust-me".parse::<ReviewChoice>().is_err());
    }
}
