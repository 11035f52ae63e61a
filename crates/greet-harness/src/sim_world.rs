//! Simulated organization driven through the command surface.
//!
//! `SimWorld` wires an [`InvitationController`] to a [`SimEnv`], in-memory
//! storage and directory, and a [`SimMailer`]. Every request goes through
//! [`InvitationController::handle`] exactly as it would arrive from the
//! transport, and the standard invariants are checked after each one.

use greet_core::{
    Environment, InvitationController, InviteConfig, MemoryDirectory, MemoryStorage,
    directory::{ShamirSetup, ShamirShare, UserProfile},
};
use greet_proto::{
    CancelledGreetingAttemptReason, ClaimerStep, DeviceId, ErrorPayload, GreeterStep, GreetingAttemptId, HumanHandle,
    InvitationEmailSentStatus, InvitationInfo, InvitationToken, InviteListItem, OrganizationId, Request, Response,
    RevealToken, ServerAddr, UserId,
    cmds::{
        authenticated::{
            AuthenticatedRep, AuthenticatedReq, InviteCancelRep, InviteCompleteRep,
            InviteGreeterCancelGreetingAttemptRep, InviteGreeterStartGreetingAttemptRep, InviteGreeterStepRep,
            InviteListRep, InviteNewDeviceRep, InviteNewShamirRecoveryRep, InviteNewUserRep,
        },
        invited::{
            InviteClaimerCancelGreetingAttemptRep, InviteClaimerStartGreetingAttemptRep, InviteClaimerStepRep,
            InviteInfoRep, InviteShamirRecoveryRevealRep, InvitedRep, InvitedReq,
        },
    },
};

use crate::{
    HarnessError, SimEnv, SimMailer,
    invariants::{InvariantRegistry, SystemSnapshot},
};

/// Organization every world starts with.
pub const ORGANIZATION: &str = "CoolOrg";

/// Controller as wired by the simulation.
pub type SimController = InvitationController<SimEnv, MemoryStorage, MemoryDirectory, SimMailer>;

/// A user of the simulated organization, with one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimUser {
    /// User identifier
    pub user_id: UserId,
    /// Device used to issue commands
    pub device_id: DeviceId,
    /// Email of the user
    pub email: String,
}

/// Email outcome and token of a created invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Created {
    /// Invitation token
    pub token: InvitationToken,
    /// Outcome of the invitation email
    pub email_sent_status: InvitationEmailSentStatus,
}

/// Simulated organization.
pub struct SimWorld {
    env: SimEnv,
    storage: MemoryStorage,
    directory: MemoryDirectory,
    mailer: SimMailer,
    controller: SimController,
    org: OrganizationId,
    snapshot: SystemSnapshot,
    invariants: InvariantRegistry,
}

impl SimWorld {
    /// World with a reachable public address (`parsec3://parsec.example.com`).
    pub fn new(seed: u64) -> Result<Self, HarnessError> {
        Self::with_config(seed, InviteConfig::with_server_addr(ServerAddr::new("parsec.example.com", None, true)))
    }

    /// World with a custom invitation configuration.
    pub fn with_config(seed: u64, config: InviteConfig) -> Result<Self, HarnessError> {
        let env = SimEnv::with_seed(seed);
        let storage = MemoryStorage::new();
        let directory = MemoryDirectory::new();
        let mailer = SimMailer::new();
        let org = OrganizationId::new(ORGANIZATION)?;
        directory.add_organization(&org);

        let controller =
            InvitationController::new(env.clone(), storage.clone(), directory.clone(), mailer.clone(), config);

        Ok(Self {
            env,
            storage,
            directory,
            mailer,
            controller,
            org,
            snapshot: SystemSnapshot::empty(),
            invariants: InvariantRegistry::standard(),
        })
    }

    /// Simulated organization.
    pub fn org(&self) -> &OrganizationId {
        &self.org
    }

    /// Shared environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Backing storage.
    pub fn storage(&self) -> &MemoryStorage {
        &self.storage
    }

    /// Certificate directory.
    pub fn directory(&self) -> &MemoryDirectory {
        &self.directory
    }

    /// Recording mailer.
    pub fn mailer(&self) -> &SimMailer {
        &self.mailer
    }

    /// Controller under test.
    pub fn controller(&self) -> &SimController {
        &self.controller
    }

    /// State as of the last operation, with history.
    pub fn snapshot(&self) -> &SystemSnapshot {
        &self.snapshot
    }

    /// Add a user with fresh identifiers.
    pub fn add_user(&self, email: &str, label: &str, profile: UserProfile) -> SimUser {
        let user = SimUser {
            user_id: UserId::from(self.env.random_u128()),
            device_id: DeviceId::from(self.env.random_u128()),
            email: email.to_string(),
        };
        self.directory.add_user(&self.org, user.user_id, user.device_id, HumanHandle::new(email, label), profile);
        user
    }

    /// Add an administrator.
    pub fn add_admin(&self, email: &str, label: &str) -> SimUser {
        self.add_user(email, label, UserProfile::Admin)
    }

    /// Revoke `user` now.
    pub fn revoke(&self, user: &SimUser) {
        self.directory.revoke_user(&self.org, user.user_id, self.env.now());
    }

    /// Install a shamir setup for `user`, replacing its live one.
    pub fn add_shamir_setup(
        &self,
        user: &SimUser,
        recipients: &[&SimUser],
        reveal_token: RevealToken,
        ciphered_data: &[u8],
    ) -> ShamirSetup {
        let setup = ShamirSetup {
            user_id: user.user_id,
            created_on: self.env.now(),
            deleted_on: None,
            threshold: 1,
            recipients: recipients
                .iter()
                .map(|r| ShamirShare { user_id: r.user_id, shares: 1 })
                .collect(),
            reveal_token,
            ciphered_data: ciphered_data.to_vec(),
        };
        self.directory.add_shamir_setup(&self.org, setup.clone());
        setup
    }

    /// Re-read storage and check every registered invariant.
    pub fn check_invariants(&mut self) -> Result<(), HarnessError> {
        self.snapshot.observe(&self.storage, &self.org)?;
        self.invariants.check_all(&self.snapshot).map_err(HarnessError::Invariant)
    }

    /// Send an authenticated request as `author`.
    pub fn authenticated(&mut self, author: &SimUser, req: AuthenticatedReq) -> Result<AuthenticatedRep, HarnessError> {
        let request = Request::Authenticated { organization_id: self.org.clone(), author: author.device_id, req };
        match self.send(request)? {
            Response::Authenticated(rep) => Ok(rep),
            other => Err(HarnessError::unexpected("authenticated reply", &other)),
        }
    }

    /// Send an invited request with `token`.
    pub fn invited(&mut self, token: InvitationToken, req: InvitedReq) -> Result<InvitedRep, HarnessError> {
        let request = Request::Invited { organization_id: self.org.clone(), token, req };
        match self.send(request)? {
            Response::Invited(rep) => Ok(rep),
            other => Err(HarnessError::unexpected("invited reply", &other)),
        }
    }

    fn send(&mut self, request: Request) -> Result<Response, HarnessError> {
        tracing::trace!(?request, "sim request");
        let response = self.controller.handle(request);
        self.check_invariants()?;
        match response {
            Response::Error(payload) => Err(HarnessError::Rejected(payload)),
            other => Ok(other),
        }
    }

    /// Invite a new user by email.
    pub fn invite_user(&mut self, author: &SimUser, email: &str, send_email: bool) -> Result<Created, HarnessError> {
        let req = AuthenticatedReq::InviteNewUser { claimer_email: email.to_string(), send_email };
        match self.authenticated(author, req)? {
            AuthenticatedRep::InviteNewUser(InviteNewUserRep::Ok { token, email_sent_status }) => {
                Ok(Created { token, email_sent_status })
            },
            other => Err(HarnessError::unexpected("invite_new_user ok", &other)),
        }
    }

    /// Invite a new device for `author`.
    pub fn invite_device(&mut self, author: &SimUser, send_email: bool) -> Result<Created, HarnessError> {
        match self.authenticated(author, AuthenticatedReq::InviteNewDevice { send_email })? {
            AuthenticatedRep::InviteNewDevice(InviteNewDeviceRep::Ok { token, email_sent_status }) => {
                Ok(Created { token, email_sent_status })
            },
            other => Err(HarnessError::unexpected("invite_new_device ok", &other)),
        }
    }

    /// Invite `claimer` to recover its account.
    pub fn invite_shamir_recovery(
        &mut self,
        author: &SimUser,
        claimer: &SimUser,
        send_email: bool,
    ) -> Result<Created, HarnessError> {
        let req = AuthenticatedReq::InviteNewShamirRecovery { claimer_user_id: claimer.user_id, send_email };
        match self.authenticated(author, req)? {
            AuthenticatedRep::InviteNewShamirRecovery(InviteNewShamirRecoveryRep::Ok { token, email_sent_status }) => {
                Ok(Created { token, email_sent_status })
            },
            other => Err(HarnessError::unexpected("invite_new_shamir_recovery ok", &other)),
        }
    }

    /// Invitations `author` may greet.
    pub fn list(&mut self, author: &SimUser) -> Result<Vec<InviteListItem>, HarnessError> {
        match self.authenticated(author, AuthenticatedReq::InviteList)? {
            AuthenticatedRep::InviteList(InviteListRep::Ok { invitations }) => Ok(invitations),
            other => Err(HarnessError::unexpected("invite_list ok", &other)),
        }
    }

    /// Cancel an invitation.
    pub fn cancel(&mut self, author: &SimUser, token: InvitationToken) -> Result<InviteCancelRep, HarnessError> {
        match self.authenticated(author, AuthenticatedReq::InviteCancel { token })? {
            AuthenticatedRep::InviteCancel(rep) => Ok(rep),
            other => Err(HarnessError::unexpected("invite_cancel reply", &other)),
        }
    }

    /// Complete an invitation.
    pub fn complete(&mut self, author: &SimUser, token: InvitationToken) -> Result<InviteCompleteRep, HarnessError> {
        match self.authenticated(author, AuthenticatedReq::InviteComplete { token })? {
            AuthenticatedRep::InviteComplete(rep) => Ok(rep),
            other => Err(HarnessError::unexpected("invite_complete reply", &other)),
        }
    }

    /// Start or rejoin an attempt as greeter.
    pub fn greeter_start(
        &mut self,
        author: &SimUser,
        token: InvitationToken,
    ) -> Result<InviteGreeterStartGreetingAttemptRep, HarnessError> {
        match self.authenticated(author, AuthenticatedReq::InviteGreeterStartGreetingAttempt { token })? {
            AuthenticatedRep::InviteGreeterStartGreetingAttempt(rep) => Ok(rep),
            other => Err(HarnessError::unexpected("invite_greeter_start_greeting_attempt reply", &other)),
        }
    }

    /// Cancel an attempt as greeter.
    pub fn greeter_cancel(
        &mut self,
        author: &SimUser,
        greeting_attempt: GreetingAttemptId,
        reason: CancelledGreetingAttemptReason,
    ) -> Result<InviteGreeterCancelGreetingAttemptRep, HarnessError> {
        let req = AuthenticatedReq::InviteGreeterCancelGreetingAttempt { greeting_attempt, reason };
        match self.authenticated(author, req)? {
            AuthenticatedRep::InviteGreeterCancelGreetingAttempt(rep) => Ok(rep),
            other => Err(HarnessError::unexpected("invite_greeter_cancel_greeting_attempt reply", &other)),
        }
    }

    /// Submit a greeter step.
    pub fn greeter_step(
        &mut self,
        author: &SimUser,
        greeting_attempt: GreetingAttemptId,
        greeter_step: GreeterStep,
    ) -> Result<InviteGreeterStepRep, HarnessError> {
        match self.authenticated(author, AuthenticatedReq::InviteGreeterStep { greeting_attempt, greeter_step })? {
            AuthenticatedRep::InviteGreeterStep(rep) => Ok(rep),
            other => Err(HarnessError::unexpected("invite_greeter_step reply", &other)),
        }
    }

    /// Invitation details as seen by the claimer.
    pub fn info(&mut self, token: InvitationToken) -> Result<InvitationInfo, HarnessError> {
        match self.invited(token, InvitedReq::InviteInfo)? {
            InvitedRep::InviteInfo(InviteInfoRep::Ok { info }) => Ok(info),
            other => Err(HarnessError::unexpected("invite_info ok", &other)),
        }
    }

    /// Start or rejoin an attempt as claimer.
    pub fn claimer_start(
        &mut self,
        token: InvitationToken,
        greeter: UserId,
    ) -> Result<InviteClaimerStartGreetingAttemptRep, HarnessError> {
        match self.invited(token, InvitedReq::InviteClaimerStartGreetingAttempt { greeter })? {
            InvitedRep::InviteClaimerStartGreetingAttempt(rep) => Ok(rep),
            other => Err(HarnessError::unexpected("invite_claimer_start_greeting_attempt reply", &other)),
        }
    }

    /// Cancel an attempt as claimer.
    pub fn claimer_cancel(
        &mut self,
        token: InvitationToken,
        greeting_attempt: GreetingAttemptId,
        reason: CancelledGreetingAttemptReason,
    ) -> Result<InviteClaimerCancelGreetingAttemptRep, HarnessError> {
        let req = InvitedReq::InviteClaimerCancelGreetingAttempt { greeting_attempt, reason };
        match self.invited(token, req)? {
            InvitedRep::InviteClaimerCancelGreetingAttempt(rep) => Ok(rep),
            other => Err(HarnessError::unexpected("invite_claimer_cancel_greeting_attempt reply", &other)),
        }
    }

    /// Submit a claimer step.
    pub fn claimer_step(
        &mut self,
        token: InvitationToken,
        greeting_attempt: GreetingAttemptId,
        claimer_step: ClaimerStep,
    ) -> Result<InviteClaimerStepRep, HarnessError> {
        match self.invited(token, InvitedReq::InviteClaimerStep { greeting_attempt, claimer_step })? {
            InvitedRep::InviteClaimerStep(rep) => Ok(rep),
            other => Err(HarnessError::unexpected("invite_claimer_step reply", &other)),
        }
    }

    /// Fetch the ciphered shamir recovery data.
    pub fn reveal(
        &mut self,
        token: InvitationToken,
        reveal_token: RevealToken,
    ) -> Result<InviteShamirRecoveryRevealRep, HarnessError> {
        match self.invited(token, InvitedReq::InviteShamirRecoveryReveal { reveal_token })? {
            InvitedRep::InviteShamirRecoveryReveal(rep) => Ok(rep),
            other => Err(HarnessError::unexpected("invite_shamir_recovery_reveal reply", &other)),
        }
    }
}

/// Context error code of a rejected request.
pub fn rejection_code(result: &Result<impl std::fmt::Debug, HarnessError>) -> Option<u16> {
    match result {
        Err(HarnessError::Rejected(ErrorPayload { code, .. })) => Some(*code),
        _ => None,
    }
}
