//! SQLite-backed durable notification gateway.
//!
//! # Responsibility
//! - Persist registrations across processes, as the platform store does, so
//!   `list_registrations` on next launch observes what an earlier run armed.
//! - Evaluate reported locations against persisted registrations and emit
//!   delivery events for crossed trigger edges.
//!
//! # Invariants
//! - Registration order is `seq ASC` (arming order); re-registering an id keeps
//!   its position and resets its presence state.
//! - Fired non-repeating registrations are deleted in the same transaction that
//!   records the new presence state.
//! - Authorization status is persisted in `gateway_settings`.

use crate::config::GatewayConfig;
use crate::db::{open_db, open_db_in_memory, DbResult};
use crate::gateway::{
    AuthorizationStatus, GatewayError, GatewayEvent, GatewayEventSender, GatewayResult,
    NotificationGateway, Registration, RegistrationOutcome, RegistrationRequest, RejectionReason,
};
use crate::model::region::{Coordinate, EdgeFlags};
use crate::model::reminder::ReminderId;
use async_trait::async_trait;
use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

const REGISTRATION_SELECT_SQL: &str = "SELECT
    id,
    title,
    latitude,
    longitude,
    radius_m,
    notify_on_entry,
    notify_on_exit,
    repeats,
    inside
FROM registrations";

const AUTHORIZATION_KEY: &str = "authorization";

/// Durable `NotificationGateway` over one SQLite connection.
pub struct SqliteGateway {
    conn: Mutex<Connection>,
    max_registrations: usize,
    max_radius_m: f64,
    grant_authorization: bool,
    events: Option<GatewayEventSender>,
}

impl SqliteGateway {
    /// Opens (or creates) the registration store at `path`.
    pub fn open(path: impl AsRef<Path>, config: &GatewayConfig) -> DbResult<Self> {
        Ok(Self::from_connection(open_db(path)?, config))
    }

    /// Opens a throwaway in-memory registration store.
    pub fn open_in_memory(config: &GatewayConfig) -> DbResult<Self> {
        Ok(Self::from_connection(open_db_in_memory()?, config))
    }

    fn from_connection(conn: Connection, config: &GatewayConfig) -> Self {
        Self {
            conn: Mutex::new(conn),
            max_registrations: config.max_registrations,
            max_radius_m: config.max_radius_m,
            grant_authorization: config.grant_authorization,
            events: None,
        }
    }

    /// Attaches the sink deliveries and authorization changes are sent to.
    pub fn with_event_sender(mut self, events: GatewayEventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Persists a permission change made outside the app and notifies the engine.
    pub fn set_authorization(&self, status: AuthorizationStatus) -> GatewayResult<()> {
        self.with_conn(|conn| write_authorization(conn, status))?;
        self.emit(GatewayEvent::AuthorizationChanged(status));
        Ok(())
    }

    /// Returns the persisted authorization status.
    pub fn authorization(&self) -> GatewayResult<AuthorizationStatus> {
        self.with_conn(read_authorization)
    }

    /// Evaluates one location sample against every registration.
    ///
    /// Returns the ids whose trigger edge fired, in arming order. Each fired id
    /// is also sent to the attached event sink.
    pub fn report_location(&self, point: Coordinate) -> GatewayResult<Vec<ReminderId>> {
        point
            .validate()
            .map_err(|err| GatewayError::Backend(format!("invalid location: {err}")))?;

        let fired = self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let rows = load_registrations(&tx)?;
            let mut fired = Vec::new();

            for (registration, was_inside) in rows {
                let (inside, fires) = match registration.observe(was_inside, &point) {
                    Ok(observation) => observation,
                    Err(err) => {
                        warn!(
                            "event=location_eval module=gateway.sqlite status=error reminder_id={} error={}",
                            registration.id, err
                        );
                        continue;
                    }
                };

                if fires && !registration.repeats {
                    tx.execute(
                        "DELETE FROM registrations WHERE id = ?1;",
                        [registration.id.to_string()],
                    )?;
                } else {
                    tx.execute(
                        "UPDATE registrations SET inside = ?1 WHERE id = ?2;",
                        params![inside, registration.id.to_string()],
                    )?;
                }
                if fires {
                    fired.push(registration.id);
                }
            }

            tx.commit()?;
            Ok(fired)
        })?;

        info!(
            "event=location_report module=gateway.sqlite status=ok fired_count={}",
            fired.len()
        );
        for id in &fired {
            self.emit(GatewayEvent::Delivered(*id));
        }
        Ok(fired)
    }

    fn with_conn<T>(
        &self,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> GatewayResult<T> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        operation(&mut conn).map_err(|err| GatewayError::Backend(err.to_string()))
    }

    fn emit(&self, event: GatewayEvent) {
        if let Some(sender) = &self.events {
            if !sender.send(event) {
                debug!("event=gateway_emit module=gateway.sqlite status=skip reason=receiver_closed");
            }
        }
    }
}

#[async_trait]
impl NotificationGateway for SqliteGateway {
    async fn request_authorization(&self) -> GatewayResult<AuthorizationStatus> {
        let grant = self.grant_authorization;
        self.with_conn(|conn| {
            let current = read_authorization(conn)?;
            if current != AuthorizationStatus::NotDetermined {
                return Ok(current);
            }
            let answer = if grant {
                AuthorizationStatus::Granted
            } else {
                AuthorizationStatus::Denied
            };
            write_authorization(conn, answer)?;
            Ok(answer)
        })
    }

    async fn register(&self, request: RegistrationRequest) -> GatewayResult<RegistrationOutcome> {
        let max_registrations = self.max_registrations;
        let registration = Registration::accept(request, self.max_radius_m);

        self.with_conn(|conn| {
            if read_authorization(conn)? == AuthorizationStatus::Denied {
                return Ok(RegistrationOutcome::Rejected(
                    RejectionReason::NotAuthorized,
                ));
            }

            let tx = conn.transaction()?;
            let id_text = registration.id.to_string();
            let exists = tx
                .query_row(
                    "SELECT 1 FROM registrations WHERE id = ?1;",
                    [id_text.as_str()],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();

            if exists {
                tx.execute(
                    "UPDATE registrations
                     SET
                        title = ?1,
                        latitude = ?2,
                        longitude = ?3,
                        radius_m = ?4,
                        notify_on_entry = ?5,
                        notify_on_exit = ?6,
                        repeats = ?7,
                        inside = NULL
                     WHERE id = ?8;",
                    params![
                        registration.title.as_str(),
                        registration.center.latitude,
                        registration.center.longitude,
                        registration.radius_m,
                        registration.flags.notify_on_entry,
                        registration.flags.notify_on_exit,
                        registration.repeats,
                        id_text,
                    ],
                )?;
            } else {
                let count: i64 =
                    tx.query_row("SELECT COUNT(*) FROM registrations;", [], |row| row.get(0))?;
                if usize::try_from(count).unwrap_or(usize::MAX) >= max_registrations {
                    return Ok(RegistrationOutcome::Rejected(
                        RejectionReason::QuotaExceeded {
                            limit: max_registrations,
                        },
                    ));
                }
                tx.execute(
                    "INSERT INTO registrations (
                        id,
                        seq,
                        title,
                        latitude,
                        longitude,
                        radius_m,
                        notify_on_entry,
                        notify_on_exit,
                        repeats
                    ) VALUES (
                        ?1,
                        (SELECT COALESCE(MAX(seq), 0) + 1 FROM registrations),
                        ?2, ?3, ?4, ?5, ?6, ?7, ?8
                    );",
                    params![
                        id_text,
                        registration.title.as_str(),
                        registration.center.latitude,
                        registration.center.longitude,
                        registration.radius_m,
                        registration.flags.notify_on_entry,
                        registration.flags.notify_on_exit,
                        registration.repeats,
                    ],
                )?;
            }

            tx.commit()?;
            Ok(RegistrationOutcome::Accepted(registration.clone()))
        })
    }

    async fn unregister(&self, id: ReminderId) -> GatewayResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM registrations WHERE id = ?1;", [id.to_string()])?;
            Ok(())
        })
    }

    async fn list_registrations(&self) -> GatewayResult<Vec<Registration>> {
        self.with_conn(|conn| {
            Ok(load_registrations(conn)?
                .into_iter()
                .map(|(registration, _)| registration)
                .collect())
        })
    }
}

fn load_registrations(conn: &Connection) -> rusqlite::Result<Vec<(Registration, Option<bool>)>> {
    let mut stmt = conn.prepare(&format!("{REGISTRATION_SELECT_SQL} ORDER BY seq ASC;"))?;
    let mut rows = stmt.query([])?;
    let mut registrations = Vec::new();
    while let Some(row) = rows.next()? {
        registrations.push(parse_registration_row(row)?);
    }
    Ok(registrations)
}

fn parse_registration_row(row: &Row<'_>) -> rusqlite::Result<(Registration, Option<bool>)> {
    let id_text: String = row.get("id")?;
    let id = Uuid::parse_str(&id_text).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
    })?;

    let registration = Registration {
        id,
        center: Coordinate::new(row.get("latitude")?, row.get("longitude")?),
        radius_m: row.get("radius_m")?,
        flags: EdgeFlags::new(
            row.get::<_, bool>("notify_on_entry")?,
            row.get::<_, bool>("notify_on_exit")?,
        ),
        title: row.get("title")?,
        repeats: row.get::<_, bool>("repeats")?,
    };
    let inside = row.get::<_, Option<bool>>("inside")?;
    Ok((registration, inside))
}

fn read_authorization(conn: &mut Connection) -> rusqlite::Result<AuthorizationStatus> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM gateway_settings WHERE key = ?1;",
            [AUTHORIZATION_KEY],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value
        .as_deref()
        .and_then(AuthorizationStatus::parse)
        .unwrap_or(AuthorizationStatus::NotDetermined))
}

fn write_authorization(conn: &mut Connection, status: AuthorizationStatus) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO gateway_settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        params![AUTHORIZATION_KEY, status.as_str()],
    )?;
    Ok(())
}
