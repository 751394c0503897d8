mod conflict;
mod error;
mod mutations;
mod queries;

pub use conflict::{buffered_window, window_count};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::ledger::Ledger;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;

pub type SharedDaySchedule = Arc<RwLock<DaySchedule>>;

// ── Group-commit ledger channel ──────────────────────────

pub(super) enum LedgerCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the ledger and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn ledger_writer_loop(mut ledger: Ledger, mut rx: mpsc::Receiver<LedgerCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            LedgerCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(LedgerCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut ledger, &mut batch);
                            handle_non_append(&mut ledger, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut ledger, &mut batch);
                }
            }
            other => handle_non_append(&mut ledger, other),
        }
    }
}

fn flush_and_respond(ledger: &mut Ledger, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(observability::LEDGER_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(ledger, batch);
    metrics::histogram!(observability::LEDGER_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    ledger: &mut Ledger,
    batch: &[(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = ledger.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = ledger.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(ledger: &mut Ledger, cmd: LedgerCommand) {
    match cmd {
        LedgerCommand::Compact { events, response } => {
            let result = Ledger::write_compact_file(ledger.path(), &events)
                .and_then(|()| ledger.swap_compact_file());
            let _ = response.send(result);
        }
        LedgerCommand::AppendsSinceCompact { response } => {
            let _ = response.send(ledger.appends_since_compact());
        }
        LedgerCommand::Append { .. } => unreachable!(),
    }
}

/// The appointment record store: day-partitioned booking state with a
/// durable event ledger behind it. Each date's partition sits behind an
/// async `RwLock`; a booking's conflict count and insert both happen under
/// that write lock, so concurrent bookers for overlapping windows are
/// serialized and the capacity ceiling holds at commit time.
pub struct Engine {
    pub(super) days: DashMap<NaiveDate, SharedDaySchedule>,
    /// Reverse lookup: appointment id → date partition holding it.
    pub(super) appointment_dates: DashMap<Ulid, NaiveDate>,
    pub(super) ledger_tx: mpsc::Sender<LedgerCommand>,
    pub policy: SchedulePolicy,
    pub notify: Arc<NotifyHub>,
}

/// Apply an event directly to a DaySchedule (no locking — caller holds the
/// lock). Rescheduled events move records across partitions and are handled
/// at the engine level instead.
fn apply_to_day(day: &mut DaySchedule, event: &Event, dates: &DashMap<Ulid, NaiveDate>) {
    match event {
        Event::Booked { appointment } => {
            dates.insert(appointment.id, day.date);
            day.insert(appointment.clone());
        }
        Event::Approved { id } => {
            if let Some(a) = day.get_mut(*id) {
                a.status = AppointmentStatus::Approved;
            }
        }
        Event::Claimed { id } => {
            if let Some(a) = day.get_mut(*id) {
                a.status = AppointmentStatus::Claimed;
            }
        }
        Event::Completed { id } => {
            if let Some(a) = day.get_mut(*id) {
                a.status = AppointmentStatus::Completed;
            }
        }
        Event::Cancelled { id, reason } => {
            if let Some(a) = day.get_mut(*id) {
                a.status = AppointmentStatus::Cancelled;
                a.cancellation_reason = Some(reason.clone());
            }
        }
        Event::Expired { id } => {
            if let Some(a) = day.get_mut(*id) {
                a.status = AppointmentStatus::Cancelled;
            }
        }
        Event::Rescheduled { .. } => {}
    }
}

/// Move a record for a Rescheduled event. `target` is None when the date is
/// unchanged; the caller holds write access to both partitions otherwise.
fn apply_reschedule(
    source: &mut DaySchedule,
    target: Option<&mut DaySchedule>,
    id: Ulid,
    date: NaiveDate,
    time: chrono::NaiveTime,
    reason: &str,
    at: chrono::NaiveDateTime,
    dates: &DashMap<Ulid, NaiveDate>,
) {
    if let Some(mut appointment) = source.remove(id) {
        appointment.preferred_date = date;
        appointment.preferred_time = time;
        appointment.reschedule_reason = Some(reason.to_string());
        appointment.rescheduled_at = Some(at);
        match target {
            Some(t) => t.insert(appointment),
            None => source.insert(appointment),
        }
        dates.insert(id, date);
    }
}

impl Engine {
    pub fn new(
        ledger_path: PathBuf,
        policy: SchedulePolicy,
        notify: Arc<NotifyHub>,
    ) -> io::Result<Self> {
        let events = Ledger::replay(&ledger_path)?;
        let ledger = Ledger::open(&ledger_path)?;
        let (ledger_tx, ledger_rx) = mpsc::channel(4096);
        tokio::spawn(ledger_writer_loop(ledger, ledger_rx));

        let engine = Self {
            days: DashMap::new(),
            appointment_dates: DashMap::new(),
            ledger_tx,
            policy,
            notify,
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly (no contention). Never use blocking_write here
        // because this may run inside an async context.
        for event in &events {
            match event {
                Event::Booked { appointment } => {
                    let day = engine.day(appointment.preferred_date);
                    let mut guard = day.try_write().expect("replay: uncontended write");
                    apply_to_day(&mut guard, event, &engine.appointment_dates);
                }
                Event::Rescheduled {
                    id,
                    date,
                    time,
                    reason,
                    at,
                } => {
                    let Some(old_date) = engine.appointment_dates.get(id).map(|e| *e.value())
                    else {
                        continue;
                    };
                    if old_date == *date {
                        let day = engine.day(old_date);
                        let mut guard = day.try_write().expect("replay: uncontended write");
                        apply_reschedule(
                            &mut guard,
                            None,
                            *id,
                            *date,
                            *time,
                            reason,
                            *at,
                            &engine.appointment_dates,
                        );
                    } else {
                        let source = engine.day(old_date);
                        let target = engine.day(*date);
                        let mut source_guard =
                            source.try_write().expect("replay: uncontended write");
                        let mut target_guard =
                            target.try_write().expect("replay: uncontended write");
                        apply_reschedule(
                            &mut source_guard,
                            Some(&mut target_guard),
                            *id,
                            *date,
                            *time,
                            reason,
                            *at,
                            &engine.appointment_dates,
                        );
                    }
                }
                other => {
                    let id = other.appointment_id();
                    if let Some(date) = engine.appointment_dates.get(&id).map(|e| *e.value())
                        && let Some(entry) = engine.days.get(&date)
                    {
                        let day = entry.value().clone();
                        drop(entry);
                        let mut guard = day.try_write().expect("replay: uncontended write");
                        apply_to_day(&mut guard, other, &engine.appointment_dates);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write an event to the ledger via the background group-commit writer.
    async fn ledger_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.ledger_tx
            .send(LedgerCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::LedgerError("ledger writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::LedgerError("ledger writer dropped response".into()))?
            .map_err(|e| EngineError::LedgerError(e.to_string()))
    }

    /// Day partition for `date`, created on first use.
    pub(super) fn day(&self, date: NaiveDate) -> SharedDaySchedule {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DaySchedule::new(date))))
            .clone()
    }

    /// Existing day partition, if any. Queries use this so reads never
    /// materialize empty partitions.
    pub fn get_day(&self, date: &NaiveDate) -> Option<SharedDaySchedule> {
        self.days.get(date).map(|e| e.value().clone())
    }

    /// Ledger-append + apply + notify in one call. Eliminates the repeated
    /// 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        day: &mut DaySchedule,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.ledger_append(event).await?;
        metrics::counter!(
            observability::EVENTS_TOTAL,
            "kind" => observability::event_label(event)
        )
        .increment(1);
        apply_to_day(day, event, &self.appointment_dates);
        self.notify.send(day.date, event);
        Ok(())
    }

    /// Lookup appointment → date, get partition, acquire write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        id: &Ulid,
    ) -> Result<(NaiveDate, tokio::sync::OwnedRwLockWriteGuard<DaySchedule>), EngineError> {
        let date = self
            .appointment_dates
            .get(id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*id))?;
        let day = self.get_day(&date).ok_or(EngineError::NotFound(*id))?;
        let guard = day.write_owned().await;
        Ok((date, guard))
    }

    /// Compact the ledger by rewriting it with only the events needed to
    /// recreate the current state: one Booked record per live appointment.
    pub async fn compact_ledger(&self) -> Result<(), EngineError> {
        let mut dates: Vec<NaiveDate> = self.days.iter().map(|e| *e.key()).collect();
        dates.sort();

        let mut events = Vec::new();
        for date in dates {
            let Some(day) = self.get_day(&date) else {
                continue;
            };
            let guard = day.read().await;
            for appointment in &guard.appointments {
                events.push(Event::Booked {
                    appointment: appointment.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.ledger_tx
            .send(LedgerCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::LedgerError("ledger writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::LedgerError("ledger writer dropped response".into()))?
            .map_err(|e| EngineError::LedgerError(e.to_string()))
    }

    pub async fn ledger_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .ledger_tx
            .send(LedgerCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
