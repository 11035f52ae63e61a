//! Invitation controller: the command surface.
//!
//! Resolves the caller context of a [`Request`], routes the command to the
//! registry, the arbiter or the exchanger, and folds the outcome into the
//! command's reply. Context errors become [`Response::Error`].

use greet_proto::{
    CancelledGreetingAttemptReason, DeviceId, ErrorPayload, GreetingAttemptId, InvitationToken, OrganizationId,
    Request, Response,
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
    access::{AuthorContext, Backend, InvitedContext},
    arbiter::GreetingArbiter,
    config::InviteConfig,
    directory::CertificateStore,
    env::Environment,
    error::{
        CancelAttemptError, CancelInvitationError, ClaimerStartError, CompleteError, ContextError,
        GreeterStartError, NewDeviceError, NewShamirRecoveryError, NewUserError, RevealError, StepError,
    },
    exchanger::{StepExchanger, StepOutcome},
    mailer::Mailer,
    registry::InvitationRegistry,
    storage::Storage,
};

/// Entry point for every invitation command.
#[derive(Clone)]
pub struct InvitationController<E, S, D, M> {
    backend: Backend<E, S, D>,
    registry: InvitationRegistry<E, S, D, M>,
    arbiter: GreetingArbiter<E, S, D>,
    exchanger: StepExchanger<E, S, D>,
}

impl<E, S, D, M> InvitationController<E, S, D, M>
where
    E: Environment,
    S: Storage,
    D: CertificateStore,
    M: Mailer,
{
    /// Wire the components over one shared backend.
    pub fn new(env: E, storage: S, directory: D, mailer: M, config: InviteConfig) -> Self {
        let backend = Backend::new(env, storage, directory);
        Self {
            registry: InvitationRegistry::new(backend.clone(), mailer, config),
            arbiter: GreetingArbiter::new(backend.clone()),
            exchanger: StepExchanger::new(backend.clone()),
            backend,
        }
    }

    /// Shared collaborators.
    pub fn backend(&self) -> &Backend<E, S, D> {
        &self.backend
    }

    /// Invitation registry.
    pub fn registry(&self) -> &InvitationRegistry<E, S, D, M> {
        &self.registry
    }

    /// Greeting attempt arbiter.
    pub fn arbiter(&self) -> &GreetingArbiter<E, S, D> {
        &self.arbiter
    }

    /// Step exchanger.
    pub fn exchanger(&self) -> &StepExchanger<E, S, D> {
        &self.exchanger
    }

    /// Execute one request.
    pub fn handle(&self, request: Request) -> Response {
        let result = match request {
            Request::Authenticated { organization_id, author, req } => {
                self.handle_authenticated(&organization_id, author, req).map(Response::Authenticated)
            },
            Request::Invited { organization_id, token, req } => {
                self.handle_invited(&organization_id, token, req).map(Response::Invited)
            },
        };

        result.unwrap_or_else(|err| {
            if err.is_transient() {
                tracing::error!(error = %err, "backend failure");
            } else {
                tracing::debug!(error = %err, "request rejected");
            }
            Response::Error(ErrorPayload::from(&err))
        })
    }

    /// Execute an authenticated command.
    pub fn handle_authenticated(
        &self,
        org: &OrganizationId,
        device: DeviceId,
        req: AuthenticatedReq,
    ) -> Result<AuthenticatedRep, ContextError> {
        let author = self.backend.authenticate(org, device)?;

        Ok(match req {
            AuthenticatedReq::InviteNewUser { claimer_email, send_email } => {
                AuthenticatedRep::InviteNewUser(self.invite_new_user(&author, &claimer_email, send_email)?)
            },
            AuthenticatedReq::InviteNewDevice { send_email } => {
                AuthenticatedRep::InviteNewDevice(self.invite_new_device(&author, send_email)?)
            },
            AuthenticatedReq::InviteNewShamirRecovery { claimer_user_id, send_email } => {
                let rep = match self.registry.create_shamir_recovery(&author, claimer_user_id, send_email) {
                    Ok(new) => InviteNewShamirRecoveryRep::Ok {
                        token: new.token,
                        email_sent_status: new.email_sent_status,
                    },
                    Err(NewShamirRecoveryError::AuthorNotAllowed) => InviteNewShamirRecoveryRep::AuthorNotAllowed,
                    Err(NewShamirRecoveryError::UserNotFound) => InviteNewShamirRecoveryRep::UserNotFound,
                    Err(NewShamirRecoveryError::Context(e)) => return Err(e),
                };
                AuthenticatedRep::InviteNewShamirRecovery(rep)
            },
            AuthenticatedReq::InviteList => {
                let invitations = self.registry.list(&author)?;
                AuthenticatedRep::InviteList(InviteListRep::Ok { invitations })
            },
            AuthenticatedReq::InviteCancel { token } => AuthenticatedRep::InviteCancel(self.invite_cancel(&author, token)?),
            AuthenticatedReq::InviteComplete { token } => {
                AuthenticatedRep::InviteComplete(self.invite_complete(&author, token)?)
            },
            AuthenticatedReq::InviteGreeterStartGreetingAttempt { token } => {
                let rep = match self.arbiter.greeter_start(&author, token) {
                    Ok(greeting_attempt) => InviteGreeterStartGreetingAttemptRep::Ok { greeting_attempt },
                    Err(GreeterStartError::InvitationNotFound) => {
                        InviteGreeterStartGreetingAttemptRep::InvitationNotFound
                    },
                    Err(GreeterStartError::InvitationCancelled) => {
                        InviteGreeterStartGreetingAttemptRep::InvitationCancelled
                    },
                    Err(GreeterStartError::InvitationCompleted) => {
                        InviteGreeterStartGreetingAttemptRep::InvitationCompleted
                    },
                    Err(GreeterStartError::AuthorNotAllowed) => InviteGreeterStartGreetingAttemptRep::AuthorNotAllowed,
                    Err(GreeterStartError::Context(e)) => return Err(e),
                };
                AuthenticatedRep::InviteGreeterStartGreetingAttempt(rep)
            },
            AuthenticatedReq::InviteGreeterCancelGreetingAttempt { greeting_attempt, reason } => {
                use InviteGreeterCancelGreetingAttemptRep as Rep;

                let rep = match self.arbiter.greeter_cancel(&author, greeting_attempt, reason) {
                    Ok(()) => Rep::Ok,
                    Err(CancelAttemptError::GreetingAttemptNotFound) => Rep::GreetingAttemptNotFound,
                    Err(CancelAttemptError::GreetingAttemptNotJoined) => Rep::GreetingAttemptNotJoined,
                    Err(CancelAttemptError::GreetingAttemptAlreadyCancelled(c)) => {
                        Rep::GreetingAttemptAlreadyCancelled { origin: c.origin, reason: c.reason, timestamp: c.timestamp }
                    },
                    Err(CancelAttemptError::InvitationCancelled) => Rep::InvitationCancelled,
                    Err(CancelAttemptError::InvitationCompleted) => Rep::InvitationCompleted,
                    Err(
                        CancelAttemptError::AuthorNotAllowed
                        | CancelAttemptError::GreeterRevoked
                        | CancelAttemptError::GreeterNotAllowed,
                    ) => Rep::AuthorNotAllowed,
                    Err(CancelAttemptError::Context(e)) => return Err(e),
                };
                AuthenticatedRep::InviteGreeterCancelGreetingAttempt(rep)
            },
            AuthenticatedReq::InviteGreeterStep { greeting_attempt, greeter_step } => {
                use InviteGreeterStepRep as Rep;

                let rep = match self.exchanger.greeter_step(&author, greeting_attempt, &greeter_step) {
                    Ok(StepOutcome::Ready(claimer_step)) => Rep::Ok { claimer_step },
                    Ok(StepOutcome::NotReady) => Rep::NotReady,
                    Err(StepError::GreetingAttemptCancelled(c)) => {
                        Rep::GreetingAttemptCancelled { origin: c.origin, reason: c.reason, timestamp: c.timestamp }
                    },
                    Err(StepError::GreetingAttemptNotFound) => Rep::GreetingAttemptNotFound,
                    Err(StepError::GreetingAttemptNotJoined) => Rep::GreetingAttemptNotJoined,
                    Err(StepError::StepTooAdvanced) => Rep::StepTooAdvanced,
                    Err(StepError::StepMismatch) => Rep::StepMismatch,
                    Err(StepError::InvitationCompleted) => Rep::InvitationCompleted,
                    Err(StepError::InvitationCancelled) => Rep::InvitationCancelled,
                    Err(StepError::AuthorNotAllowed | StepError::GreeterRevoked | StepError::GreeterNotAllowed) => {
                        Rep::AuthorNotAllowed
                    },
                    Err(StepError::Context(e)) => return Err(e),
                };
                AuthenticatedRep::InviteGreeterStep(rep)
            },
        })
    }

    fn invite_new_user(
        &self,
        author: &AuthorContext,
        claimer_email: &str,
        send_email: bool,
    ) -> Result<InviteNewUserRep, ContextError> {
        Ok(match self.registry.create_user(author, claimer_email, send_email) {
            Ok(new) => InviteNewUserRep::Ok { token: new.token, email_sent_status: new.email_sent_status },
            Err(NewUserError::AuthorNotAllowed) => InviteNewUserRep::AuthorNotAllowed,
            Err(NewUserError::ClaimerEmailAlreadyEnrolled) => InviteNewUserRep::ClaimerEmailAlreadyEnrolled,
            Err(NewUserError::Context(e)) => return Err(e),
        })
    }

    fn invite_new_device(&self, author: &AuthorContext, send_email: bool) -> Result<InviteNewDeviceRep, ContextError> {
        match self.registry.create_device(author, send_email) {
            Ok(new) => Ok(InviteNewDeviceRep::Ok { token: new.token, email_sent_status: new.email_sent_status }),
            Err(NewDeviceError::Context(e)) => Err(e),
        }
    }

    fn invite_cancel(&self, author: &AuthorContext, token: InvitationToken) -> Result<InviteCancelRep, ContextError> {
        Ok(match self.registry.cancel(author, token) {
            Ok(()) => InviteCancelRep::Ok,
            Err(CancelInvitationError::InvitationNotFound) => InviteCancelRep::InvitationNotFound,
            Err(CancelInvitationError::InvitationCompleted) => InviteCancelRep::InvitationCompleted,
            Err(CancelInvitationError::InvitationAlreadyCancelled) => InviteCancelRep::InvitationAlreadyCancelled,
            Err(CancelInvitationError::AuthorNotAllowed) => InviteCancelRep::AuthorNotAllowed,
            Err(CancelInvitationError::Context(e)) => return Err(e),
        })
    }

    fn invite_complete(
        &self,
        author: &AuthorContext,
        token: InvitationToken,
    ) -> Result<InviteCompleteRep, ContextError> {
        Ok(match self.registry.complete(author, token) {
            Ok(()) => InviteCompleteRep::Ok,
            Err(CompleteError::InvitationNotFound) => InviteCompleteRep::InvitationNotFound,
            Err(CompleteError::InvitationCancelled) => InviteCompleteRep::InvitationCancelled,
            Err(CompleteError::InvitationAlreadyCompleted) => InviteCompleteRep::InvitationAlreadyCompleted,
            Err(CompleteError::AuthorNotAllowed) => InviteCompleteRep::AuthorNotAllowed,
            Err(CompleteError::Context(e)) => return Err(e),
        })
    }

    /// Execute an invited command.
    pub fn handle_invited(
        &self,
        org: &OrganizationId,
        token: InvitationToken,
        req: InvitedReq,
    ) -> Result<InvitedRep, ContextError> {
        let invited = self.backend.invited(org, token)?;

        Ok(match req {
            InvitedReq::InviteInfo => {
                let info = self.registry.info_as_invited(&invited)?;
                InvitedRep::InviteInfo(InviteInfoRep::Ok { info })
            },
            InvitedReq::InviteClaimerStartGreetingAttempt { greeter } => {
                let rep = match self.arbiter.claimer_start(&invited, greeter) {
                    Ok(greeting_attempt) => InviteClaimerStartGreetingAttemptRep::Ok { greeting_attempt },
                    Err(ClaimerStartError::GreeterNotFound) => InviteClaimerStartGreetingAttemptRep::GreeterNotFound,
                    Err(ClaimerStartError::GreeterRevoked) => InviteClaimerStartGreetingAttemptRep::GreeterRevoked,
                    Err(ClaimerStartError::GreeterNotAllowed) => {
                        InviteClaimerStartGreetingAttemptRep::GreeterNotAllowed
                    },
                    Err(ClaimerStartError::Context(e)) => return Err(e),
                };
                InvitedRep::InviteClaimerStartGreetingAttempt(rep)
            },
            InvitedReq::InviteClaimerCancelGreetingAttempt { greeting_attempt, reason } => {
                InvitedRep::InviteClaimerCancelGreetingAttempt(self.claimer_cancel(&invited, greeting_attempt, reason)?)
            },
            InvitedReq::InviteClaimerStep { greeting_attempt, claimer_step } => {
                use InviteClaimerStepRep as Rep;

                let rep = match self.exchanger.claimer_step(&invited, greeting_attempt, &claimer_step) {
                    Ok(StepOutcome::Ready(greeter_step)) => Rep::Ok { greeter_step },
                    Ok(StepOutcome::NotReady) => Rep::NotReady,
                    Err(StepError::GreetingAttemptCancelled(c)) => {
                        Rep::GreetingAttemptCancelled { origin: c.origin, reason: c.reason, timestamp: c.timestamp }
                    },
                    Err(StepError::GreetingAttemptNotFound) => Rep::GreetingAttemptNotFound,
                    Err(StepError::GreetingAttemptNotJoined) => Rep::GreetingAttemptNotJoined,
                    Err(StepError::StepTooAdvanced) => Rep::StepTooAdvanced,
                    Err(StepError::StepMismatch) => Rep::StepMismatch,
                    Err(StepError::GreeterRevoked) => Rep::GreeterRevoked,
                    Err(StepError::GreeterNotAllowed | StepError::AuthorNotAllowed) => Rep::GreeterNotAllowed,
                    Err(StepError::InvitationCompleted | StepError::InvitationCancelled) => {
                        return Err(ContextError::InvitationDeleted);
                    },
                    Err(StepError::Context(e)) => return Err(e),
                };
                InvitedRep::InviteClaimerStep(rep)
            },
            InvitedReq::InviteShamirRecoveryReveal { reveal_token } => {
                let rep = match self.registry.shamir_recovery_reveal(&invited, reveal_token) {
                    Ok(ciphered_data) => InviteShamirRecoveryRevealRep::Ok { ciphered_data },
                    Err(RevealError::BadInvitationType) => InviteShamirRecoveryRevealRep::BadInvitationType,
                    Err(RevealError::BadRevealToken) => InviteShamirRecoveryRevealRep::BadRevealToken,
                    Err(RevealError::Context(e)) => return Err(e),
                };
                InvitedRep::InviteShamirRecoveryReveal(rep)
            },
        })
    }

    fn claimer_cancel(
        &self,
        invited: &InvitedContext,
        greeting_attempt: GreetingAttemptId,
        reason: CancelledGreetingAttemptReason,
    ) -> Result<InviteClaimerCancelGreetingAttemptRep, ContextError> {
        use InviteClaimerCancelGreetingAttemptRep as Rep;

        Ok(match self.arbiter.claimer_cancel(invited, greeting_attempt, reason) {
            Ok(()) => Rep::Ok,
            Err(CancelAttemptError::GreetingAttemptNotFound) => Rep::GreetingAttemptNotFound,
            Err(CancelAttemptError::GreetingAttemptNotJoined) => Rep::GreetingAttemptNotJoined,
            Err(CancelAttemptError::GreetingAttemptAlreadyCancelled(c)) => {
                Rep::GreetingAttemptAlreadyCancelled { origin: c.origin, reason: c.reason, timestamp: c.timestamp }
            },
            Err(CancelAttemptError::GreeterRevoked) => Rep::GreeterRevoked,
            Err(CancelAttemptError::GreeterNotAllowed | CancelAttemptError::AuthorNotAllowed) => {
                Rep::GreeterNotAllowed
            },
            Err(CancelAttemptError::InvitationCompleted | CancelAttemptError::InvitationCancelled) => {
                return Err(ContextError::InvitationDeleted);
            },
            Err(CancelAttemptError::Context(e)) => return Err(e),
        })
    }
}
