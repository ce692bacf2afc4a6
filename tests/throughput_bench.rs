//! Standalone queue throughput measurements.
//!
//! These are not assertions, just numbers for comparing the two ring
//! algorithms and the blocking adapter on a given machine.
//!
//! Run with: cargo test --release throughput_bench -- --ignored --nocapture

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use flywheel::{BlockingQueue, MpmcQueue, SeqQueue, WaitStrategy};

const MESSAGES: u64 = 2_000_000;
const CAPACITY: usize = 1024;

fn print_result(label: &str, count: u64, elapsed: Duration) {
    let rate = count as f64 / elapsed.as_secs_f64() / 1e6;
    println!("  {label:<28} {count:>9} msgs in {elapsed:>10.2?}  ({rate:>7.2} M msg/s)");
}

#[test]
#[ignore]
fn throughput_bench() {
    println!("\n============================================================");
    println!("  QUEUE THROUGHPUT (1 producer, 1 consumer)");
    println!("============================================================\n");

    bench_mpmc();
    bench_seq();
    bench_blocking(WaitStrategy::Parking, "blocking (parking)");
    bench_blocking(WaitStrategy::Condvar, "blocking (condvar)");

    println!("\n============================================================\n");
}

fn bench_mpmc() {
    let queue: Arc<MpmcQueue<u64>> = Arc::new(MpmcQueue::new(CAPACITY));

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for i in 0..MESSAGES {
                let mut value = i;
                loop {
                    match queue.offer(value) {
                        Ok(()) => break,
                        Err(rejected) => {
                            value = rejected;
                            std::hint::spin_loop();
                        }
                    }
                }
            }
        })
    };

    let start = Instant::now();
    let mut received = 0u64;
    while received < MESSAGES {
        if queue.poll().is_some() {
            received += 1;
        } else {
            std::hint::spin_loop();
        }
    }
    let elapsed = start.elapsed();
    producer.join().unwrap();
    print_result("split-cursor ring", MESSAGES, elapsed);
}

fn bench_seq() {
    let queue: Arc<SeqQueue<u64>> = Arc::new(SeqQueue::new(CAPACITY));

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for i in 0..MESSAGES {
                let mut value = i;
                loop {
                    match queue.offer(value) {
                        Ok(()) => break,
                        Err(rejected) => {
                            value = rejected;
                            std::hint::spin_loop();
                        }
                    }
                }
            }
        })
    };

    let start = Instant::now();
    let mut received = 0u64;
    while received < MESSAGES {
        if queue.poll().is_some() {
            received += 1;
        } else {
            std::hint::spin_loop();
        }
    }
    let elapsed = start.elapsed();
    producer.join().unwrap();
    print_result("per-slot-sequence ring", MESSAGES, elapsed);
}

fn bench_blocking(strategy: WaitStrategy, label: &str) {
    let queue: BlockingQueue<u64> = BlockingQueue::with_strategy(CAPACITY, strategy);

    let producer = {
        let queue = queue.clone();
        thread::spawn(move || {
            for i in 0..MESSAGES {
                queue.put(i).unwrap();
            }
        })
    };

    let start = Instant::now();
    for _ in 0..MESSAGES {
        queue.take().unwrap();
    }
    let elapsed = start.elapsed();
    producer.join().unwrap();
    print_result(label, MESSAGES, elapsed);
}
