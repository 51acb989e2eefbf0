use chrono::Utc;
use log::{debug, warn};
use model::{
    audit::{AuditLogEntry, ACTION_PAYMENT_FAILED, ACTION_PAYMENT_SUCCEEDED},
    event::DomainEvent,
    notification::{Notification, NotificationKind},
    participant::{Participant, ParticipantRole, ParticipantStatus, PaymentStatus},
    trip::Trip,
    user::User,
    WithId,
};
use serde::{Deserialize, Serialize};
use utility::id::Id;

use crate::{
    config::Environment,
    database::{
        AuditRepo as _, Database, NotificationRepo as _, ParticipantRepo as _,
        TripRepo as _, UserRepo as _,
    },
    error::{Error, Result},
    events::EventBus,
    ledger::IdempotencyLedger,
    payment_provider::{IntentMetadata, IntentRequest, PaymentProvider},
    Replayable,
};

const PROVIDER: &str = "stripe";
const IDEMPOTENCY_SCOPE: &str = "payment_intent";

pub const EVENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const EVENT_INTENT_FAILED: &str = "payment_intent.payment_failed";
pub const EVENT_INTENT_CANCELED: &str = "payment_intent.canceled";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResponse {
    pub client_secret: String,
    pub payment_intent_id: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub replay: bool,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: WebhookObject,
}

#[derive(Debug, Deserialize)]
struct WebhookObject {
    id: String,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    metadata: WebhookMetadata,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookMetadata {
    trip_id: Option<String>,
    user_id: Option<String>,
    booking_id: Option<String>,
}

/// Issues payment intents and reconciles provider webhooks into participant
/// payment transitions. Exactly-once effects come from the replay ledger in
/// front and guarded conditional UPDATEs underneath, so provider retries
/// and concurrent deliveries are safe.
#[derive(Clone)]
pub struct PaymentService<D: Database, P: PaymentProvider> {
    database: D,
    provider: Option<P>,
    bus: EventBus,
    ledger: IdempotencyLedger<D>,
    webhook_secret: Option<String>,
    environment: Environment,
}

impl<D: Database, P: PaymentProvider> PaymentService<D, P> {
    pub fn new(
        database: D,
        provider: Option<P>,
        bus: EventBus,
        ledger: IdempotencyLedger<D>,
        webhook_secret: Option<String>,
        environment: Environment,
    ) -> Self {
        Self {
            database,
            provider,
            bus,
            ledger,
            webhook_secret,
            environment,
        }
    }

    fn provider(&self) -> Result<&P> {
        self.provider.as_ref().ok_or(Error::PaymentUnavailable)
    }

    /// `createIntent`. The charged amount is always
    /// `price_per_seat × seats_held`; a client-supplied amount that
    /// disagrees is rejected before the provider is involved.
    pub async fn create_intent(
        &self,
        trip_id: &Id<Trip>,
        user_id: &Id<User>,
        amount_minor: i64,
        idempotency_key: Option<&str>,
    ) -> Result<Replayable<IntentResponse>> {
        let provider = self.provider()?;

        let participant = self
            .database
            .auto()
            .participant_for_user(trip_id, user_id)
            .await?
            .ok_or(Error::NotFound("booking"))?;
        if participant.content.role != ParticipantRole::Rider {
            return Err(Error::Authorization("drivers do not pay for seats".to_owned()));
        }
        if participant.content.status != ParticipantStatus::Accepted {
            return Err(Error::PreconditionFailed(
                "booking must be accepted before payment".to_owned(),
            ));
        }

        let trip = self.database.auto().get_trip(trip_id).await?;
        let expected = trip.content.amount_minor_for(participant.content.seats_held);
        if amount_minor != expected {
            return Err(Error::Validation(format!(
                "amount mismatch: expected {} minor units",
                expected
            )));
        }

        if let Some(key) = idempotency_key {
            if let Some(stored) = self
                .ledger
                .stored_response(IDEMPOTENCY_SCOPE, &user_id.raw(), key)
                .await
            {
                if let Ok(response) = serde_json::from_value::<IntentResponse>(stored) {
                    return Ok(Replayable::replayed(response));
                }
            }
        }

        // an intent already in flight is returned instead of re-created
        if participant.content.payment_status == PaymentStatus::Pending {
            if let Some(intent_id) = &participant.content.payment_intent_id {
                let intent = provider.get_intent(intent_id).await?;
                let response = IntentResponse {
                    client_secret: intent.client_secret,
                    payment_intent_id: intent.id,
                    amount: intent.amount,
                    currency: intent.currency,
                };
                self.remember(user_id, idempotency_key, &response).await;
                return Ok(Replayable::fresh(response));
            }
        }

        let intent = provider
            .create_intent(IntentRequest {
                amount_minor: expected,
                currency: trip.content.currency.clone(),
                description: format!(
                    "{} seat(s) on trip {}",
                    participant.content.seats_held, trip_id
                ),
                metadata: IntentMetadata {
                    trip_id: trip_id.raw(),
                    user_id: user_id.raw(),
                    booking_id: participant.id.raw(),
                },
            })
            .await?;

        let claimed = self
            .database
            .auto()
            .set_payment_intent(&participant.id, &intent.id)
            .await?;
        if claimed == 0 {
            // another writer attached an intent first; serve theirs
            let current = self
                .database
                .auto()
                .get_participant(&participant.id)
                .await?;
            if let Some(existing_id) = &current.content.payment_intent_id {
                if existing_id != &intent.id {
                    let existing = provider.get_intent(existing_id).await?;
                    let response = IntentResponse {
                        client_secret: existing.client_secret,
                        payment_intent_id: existing.id,
                        amount: existing.amount,
                        currency: existing.currency,
                    };
                    self.remember(user_id, idempotency_key, &response).await;
                    return Ok(Replayable::fresh(response));
                }
            }
        }

        let response = IntentResponse {
            client_secret: intent.client_secret,
            payment_intent_id: intent.id,
            amount: intent.amount,
            currency: intent.currency,
        };
        self.remember(user_id, idempotency_key, &response).await;
        Ok(Replayable::fresh(response))
    }

    async fn remember(
        &self,
        user_id: &Id<User>,
        idempotency_key: Option<&str>,
        response: &IntentResponse,
    ) {
        let Some(key) = idempotency_key else { return };
        match serde_json::to_value(response) {
            Ok(snapshot) => {
                self.ledger
                    .store_response(IDEMPOTENCY_SCOPE, &user_id.raw(), key, &snapshot)
                    .await;
            }
            Err(why) => warn!("payments: response not serialisable: {}", why),
        }
    }

    /// `onWebhook`. Replays are acknowledged without effects; fresh events
    /// apply at most one guarded transition each and the event id is marked
    /// processed only after every side effect, so a crash mid-handler keeps
    /// the delivery eligible for retry.
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookAck> {
        let provider = self.provider()?;

        match (&self.webhook_secret, signature) {
            (Some(secret), Some(signature)) => {
                if !provider.verify_webhook_signature(body, signature, secret) {
                    return Err(Error::Authentication(
                        "webhook signature mismatch".to_owned(),
                    ));
                }
            }
            (Some(_), None) => {
                return Err(Error::Authentication(
                    "missing webhook signature".to_owned(),
                ));
            }
            (None, _) if self.environment.is_production() => {
                return Err(Error::Configuration("STRIPE_WEBHOOK_SECRET".to_owned()));
            }
            (None, _) => {
                warn!("payments: webhook signature verification disabled outside production");
            }
        }

        let envelope: WebhookEnvelope = serde_json::from_slice(body)
            .map_err(|why| Error::Validation(format!("malformed webhook body: {}", why)))?;

        if self.ledger.seen_webhook(PROVIDER, &envelope.id).await {
            return Ok(WebhookAck {
                received: true,
                replay: true,
            });
        }

        match envelope.event_type.as_str() {
            EVENT_INTENT_SUCCEEDED => self.apply_succeeded(&envelope).await?,
            EVENT_INTENT_FAILED => {
                self.apply_transition(&envelope, PaymentStatus::Failed).await?
            }
            EVENT_INTENT_CANCELED => {
                self.apply_transition(&envelope, PaymentStatus::Canceled).await?
            }
            other => debug!("payments: ignoring webhook type {}", other),
        }

        self.ledger
            .mark_webhook(PROVIDER, &envelope.id, &envelope.event_type)
            .await;

        Ok(WebhookAck {
            received: true,
            replay: false,
        })
    }

    async fn load_event_participant(
        &self,
        envelope: &WebhookEnvelope,
    ) -> Result<Option<WithId<Participant>>> {
        let object = &envelope.data.object;
        let Some(booking_id) = &object.metadata.booking_id else {
            return Err(Error::validation("webhook metadata missing bookingId"));
        };
        let participant = self
            .database
            .auto()
            .get_participant(&Id::new(booking_id.clone()))
            .await;
        let participant = match participant {
            Ok(participant) => participant,
            Err(crate::database::DatabaseError::NotFound) => {
                warn!(
                    "payments: webhook {} names unknown booking {}",
                    envelope.id, booking_id
                );
                return Ok(None);
            }
            Err(why) => return Err(why.into()),
        };

        // the event must talk about the intent this participant holds and
        // the trip/user it was minted for; anything else is stale or forged
        if participant.content.payment_intent_id.as_deref() != Some(object.id.as_str())
        {
            warn!(
                "payments: webhook {} intent {} does not match booking {}",
                envelope.id, object.id, booking_id
            );
            return Ok(None);
        }
        let metadata_matches = object
            .metadata
            .trip_id
            .as_ref()
            .map(|trip_id| *trip_id == participant.content.trip_id.raw())
            .unwrap_or(true)
            && object
                .metadata
                .user_id
                .as_ref()
                .map(|user_id| *user_id == participant.content.user_id.raw())
                .unwrap_or(true);
        if !metadata_matches {
            warn!("payments: webhook {} metadata mismatch, dropping", envelope.id);
            return Ok(None);
        }
        Ok(Some(participant))
    }

    async fn apply_succeeded(&self, envelope: &WebhookEnvelope) -> Result<()> {
        let Some(participant) = self.load_event_participant(envelope).await? else {
            return Ok(());
        };
        let object = &envelope.data.object;

        let applied = self
            .database
            .auto()
            .apply_payment_transition(
                &participant.id,
                &object.id,
                &[
                    PaymentStatus::Pending,
                    PaymentStatus::Failed,
                    PaymentStatus::Canceled,
                ],
                PaymentStatus::Paid,
                Some(Utc::now()),
            )
            .await?;
        if applied == 0 {
            debug!(
                "payments: stale success event {} for booking {}",
                envelope.id, participant.id
            );
            return Ok(());
        }

        let trip = self
            .database
            .auto()
            .get_trip(&participant.content.trip_id)
            .await?;
        let amount = object
            .amount
            .unwrap_or_else(|| trip.content.amount_minor_for(participant.content.seats_held));
        self.bus.publish(&DomainEvent::PaymentSucceeded {
            trip_id: participant.content.trip_id.clone(),
            participant_id: participant.id.clone(),
            user_id: participant.content.user_id.clone(),
            amount_minor: amount,
        });
        self.notify(
            &participant.content.user_id,
            NotificationKind::PaymentSucceeded,
            "Payment received",
            "Your seat is paid for. Enjoy the ride!".to_owned(),
        )
        .await;
        self.audit(ACTION_PAYMENT_SUCCEEDED, &participant.id.raw()).await;
        Ok(())
    }

    async fn apply_transition(
        &self,
        envelope: &WebhookEnvelope,
        to: PaymentStatus,
    ) -> Result<()> {
        let Some(participant) = self.load_event_participant(envelope).await? else {
            return Ok(());
        };

        let applied = self
            .database
            .auto()
            .apply_payment_transition(
                &participant.id,
                &envelope.data.object.id,
                &[PaymentStatus::Pending],
                to,
                None,
            )
            .await?;
        if applied == 0 {
            debug!(
                "payments: stale {} event {} for booking {}",
                to.as_str(),
                envelope.id,
                participant.id
            );
            return Ok(());
        }

        if to == PaymentStatus::Failed {
            self.bus.publish(&DomainEvent::PaymentFailed {
                trip_id: participant.content.trip_id.clone(),
                participant_id: participant.id.clone(),
                user_id: participant.content.user_id.clone(),
            });
            self.notify(
                &participant.content.user_id,
                NotificationKind::PaymentFailed,
                "Payment failed",
                "Your payment did not go through; please try again.".to_owned(),
            )
            .await;
            self.audit(ACTION_PAYMENT_FAILED, &participant.id.raw()).await;
        }
        Ok(())
    }

    async fn notify(
        &self,
        user_id: &Id<User>,
        kind: NotificationKind,
        title: &str,
        body: String,
    ) {
        let allowed = match self.database.auto().get_user(user_id).await {
            Ok(user) => user.content.notification_prefs.payment,
            Err(why) => {
                warn!("payments: notification pref lookup failed: {:?}", why);
                return;
            }
        };
        if !allowed {
            return;
        }
        let result = self
            .database
            .auto()
            .insert_notification(Notification {
                user_id: user_id.clone(),
                kind,
                title: title.to_owned(),
                body,
                read: false,
                created_at: Utc::now(),
            })
            .await;
        if let Err(why) = result {
            warn!("payments: notification write failed: {:?}", why);
        }
    }

    async fn audit(&self, action: &str, participant_id: &str) {
        let result = self
            .database
            .auto()
            .insert_audit_log(AuditLogEntry {
                actor_id: None,
                action: action.to_owned(),
                entity_type: Some("participant".to_owned()),
                entity_id: Some(participant_id.to_owned()),
                details: serde_json::Value::Null,
                created_at: Utc::now(),
            })
            .await;
        if let Err(why) = result {
            warn!("payments: audit write failed: {:?}", why);
        }
    }
}
