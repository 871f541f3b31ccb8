use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveTime, Weekday};
use rust_decimal::Decimal;
use ulid::Ulid;

use docket::config::BookingConfig;
use docket::engine::Engine;
use docket::interval::TimeRange;
use docket::model::{AppointmentRequest, PaymentMethod};
use docket::store::MemoryStore;

const SLOT_MIN: u32 = 15;
const SLOTS_PER_DAY: u32 = 24 * 60 / SLOT_MIN;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

/// The n-th 15-minute slot counting from 2024-01-01, one day after another.
/// Slots end a nanosecond short so the last one still fits in the day.
fn slot(n: u32) -> (NaiveDate, NaiveTime, NaiveTime) {
    let first = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let day = first + chrono::Days::new((n / SLOTS_PER_DAY) as u64);
    let start = (n % SLOTS_PER_DAY) * SLOT_MIN * 60;
    let last_second = start + SLOT_MIN * 60 - 1;
    (
        day,
        NaiveTime::from_num_seconds_from_midnight_opt(start, 0).unwrap(),
        NaiveTime::from_num_seconds_from_midnight_opt(last_second, 999_999_999).unwrap(),
    )
}

fn request(doctor_id: Ulid, room_id: Option<Ulid>, n: u32) -> AppointmentRequest {
    let (date, start, end) = slot(n);
    AppointmentRequest {
        doctor_id,
        patient_id: Ulid::new(),
        clinic_id: Ulid::new(),
        room_id,
        date,
        start,
        end,
        total_cost: Decimal::new(5_000, 2),
    }
}

/// A doctor available around the clock, every day.
async fn doctor(engine: &Engine<MemoryStore>) -> Ulid {
    let id = Ulid::new();
    let all_day = TimeRange::new(
        NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
        NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap(),
    );
    for weekday in [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ] {
        engine.add_schedule_entry(id, weekday, all_day).await.unwrap();
    }
    id
}

async fn phase1_sequential(engine: &Engine<MemoryStore>) {
    let d = doctor(engine).await;
    let room = Some(Ulid::new());
    let n = 2000;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        engine.create_appointment(request(d, room, i)).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(engine: &Arc<Engine<MemoryStore>>) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let engine = engine.clone();
        let d = doctor(&engine).await;
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                engine.create_appointment(request(d, None, j)).await.unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

/// Every task fights over the same doctor and room; most attempts are rejected.
async fn phase3_contended(engine: &Arc<Engine<MemoryStore>>) {
    let d = doctor(engine).await;
    let room = Some(Ulid::new());
    let n_tasks = 20;
    let n_slots = 100;

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut won = 0usize;
            let mut latencies = Vec::with_capacity(n_slots as usize);
            for j in 0..n_slots {
                let t = Instant::now();
                if engine.create_appointment(request(d, room, j)).await.is_ok() {
                    won += 1;
                }
                latencies.push(t.elapsed());
            }
            (won, latencies)
        }));
    }

    let mut won = 0;
    let mut all_latencies = Vec::new();
    for h in handles {
        let (w, l) = h.await.unwrap();
        won += w;
        all_latencies.extend(l);
    }
    println!(
        "  {n_tasks} tasks racing for {n_slots} slots: {won} booked in {:.2}s",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(won, n_slots as usize);
    print_latency("contended write latency", &mut all_latencies);
}

async fn phase4_payments(engine: &Arc<Engine<MemoryStore>>) {
    let d = doctor(engine).await;
    let n_appointments = 200;
    let mut ids = Vec::with_capacity(n_appointments);
    for i in 0..n_appointments as u32 {
        ids.push(engine.create_appointment(request(d, None, i)).await.unwrap());
    }

    let start = Instant::now();
    let mut handles = Vec::new();
    for id in ids {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            // 50.00 cost in 7.00 steps: the eighth payment overpays.
            for _ in 0..8 {
                let t = Instant::now();
                let _ = engine.record_payment(id, Decimal::new(700, 2), PaymentMethod::Cash).await;
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }
    let mut all_latencies = Vec::new();
    for h in handles {
        all_latencies.extend(h.await.unwrap());
    }
    println!(
        "  {} payments on {n_appointments} appointments in {:.2}s",
        all_latencies.len(),
        start.elapsed().as_secs_f64()
    );
    print_latency("payment latency", &mut all_latencies);
}

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt().try_init();

    let mut config = BookingConfig::from_env();
    config.data_dir = std::env::temp_dir().join(format!("docket_bench_{}", Ulid::new()));
    println!("=== docket stress benchmark ===");
    println!("data dir: {}\n", config.data_dir.display());

    let engine = Arc::new(Engine::open(&config).expect("open engine"));

    println!("[phase 1] sequential write throughput");
    phase1_sequential(&engine).await;

    println!("\n[phase 2] concurrent write throughput");
    phase2_concurrent(&engine).await;

    println!("\n[phase 3] contended writes");
    phase3_contended(&engine).await;

    println!("\n[phase 4] payment ledger under load");
    phase4_payments(&engine).await;

    println!("\n[compaction]");
    let start = Instant::now();
    let records = engine.store().compact().await.expect("compact");
    println!("  {records} records in {:.2}s", start.elapsed().as_secs_f64());

    let _ = std::fs::remove_dir_all(&config.data_dir);
}
