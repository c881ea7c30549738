use std::sync::Arc;
use std::thread;
use std::time::Duration;

use carwatch::{BoundedFrameQueue, Frame, PutOutcome};

/// 1x1 frame carrying a 16-bit sequence number in its red and green samples.
fn numbered_frame(seq: u16) -> Frame {
    let [hi, lo] = seq.to_be_bytes();
    Frame::new(vec![hi, lo, 0], 1, 1).unwrap()
}

fn sequence(frame: &Frame) -> u16 {
    u16::from_be_bytes([frame.pixels()[0], frame.pixels()[1]])
}

#[test]
fn slow_consumer_sees_ordered_subset_and_queue_stays_bounded() {
    const TOTAL: u16 = 2_000;
    let queue = Arc::new(BoundedFrameQueue::new(5).unwrap());

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut dropped = 0u64;
            for seq in 0..TOTAL {
                if queue.put(numbered_frame(seq)) == PutOutcome::DroppedOldest {
                    dropped += 1;
                }
                assert!(queue.len() <= queue.capacity());
                if seq % 200 == 0 {
                    thread::sleep(Duration::from_millis(1));
                }
            }
            dropped
        })
    };

    let mut received = Vec::new();
    while let Some(frame) = queue.get(Duration::from_millis(200)) {
        received.push(sequence(&frame));
        thread::sleep(Duration::from_micros(200));
    }
    let dropped = producer.join().unwrap();

    // Capture order is kept; dropped frames are simply absent.
    assert!(received.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(received.last().copied(), Some(TOTAL - 1));
    assert_eq!(received.len() as u64 + dropped, TOTAL as u64);
    assert_eq!(queue.dropped_total(), dropped);
    assert!(dropped > 0);
}
