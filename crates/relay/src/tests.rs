use super::*;
use record::RecordSource;
use std::thread;
use std::time::Duration;

// -------------------- Ring buffer --------------------

#[test]
fn records_arrive_in_order_after_wraparound() {
    let (mut w, mut r) = channel::<u32>(3);
    for round in 0..4u32 {
        for i in 0..3 {
            w.write(round * 10 + i).unwrap();
        }
        for i in 0..3 {
            assert_eq!(r.read().unwrap(), Some(round * 10 + i));
        }
    }
    assert_eq!(w.records_written(), 12);
    assert_eq!(r.records_read(), 12);
}

#[test]
fn finish_unblocks_reader_after_draining() {
    let (mut w, mut r) = channel::<u32>(4);
    w.write(1).unwrap();
    w.write(2).unwrap();
    w.finish();
    w.finish();
    assert_eq!(r.read().unwrap(), Some(1));
    assert_eq!(r.read().unwrap(), Some(2));
    assert_eq!(r.read().unwrap(), None);
    assert_eq!(r.read().unwrap(), None);
    assert!(r.is_drained());
}

#[test]
fn try_read_never_blocks() {
    let (mut w, mut r) = channel::<u32>(2);
    assert_eq!(r.try_read().unwrap(), None);
    assert!(!r.is_drained());
    w.write(7).unwrap();
    assert_eq!(r.try_read().unwrap(), Some(7));
    w.finish();
    assert_eq!(r.try_read().unwrap(), None);
    assert!(r.is_drained());
    r.cancel();
    assert!(matches!(r.try_read(), Err(RelayError::Cancelled)));
}

#[test]
fn write_after_finish_is_rejected() {
    let (mut w, _r) = channel::<u32>(2);
    w.finish();
    assert!(matches!(w.write(1), Err(RelayError::Finished)));
}

#[test]
fn dropping_writer_finishes_stream() {
    let (mut w, mut r) = channel::<u32>(2);
    w.write(9).unwrap();
    drop(w);
    assert_eq!(r.read().unwrap(), Some(9));
    assert_eq!(r.read().unwrap(), None);
}

#[test]
fn writer_blocks_while_full_and_resumes() {
    let (mut w, mut r) = channel::<u64>(2);
    let producer = thread::spawn(move || {
        for i in 0..1000u64 {
            w.write(i).unwrap();
        }
    });
    let mut got = Vec::new();
    while let Some(v) = r.read().unwrap() {
        got.push(v);
    }
    producer.join().unwrap();
    assert_eq!(got, (0..1000).collect::<Vec<_>>());
}

#[test]
fn cancel_wakes_blocked_reader() {
    let (w, mut r) = channel::<u32>(2);
    let reader = thread::spawn(move || r.read());
    thread::sleep(Duration::from_millis(50));
    w.cancel();
    assert!(matches!(reader.join().unwrap(), Err(RelayError::Cancelled)));
}

#[test]
fn cancel_wakes_blocked_writer_and_drops_buffer() {
    let (mut w, r) = channel::<u32>(1);
    w.write(1).unwrap();
    let writer = thread::spawn(move || w.write(2));
    thread::sleep(Duration::from_millis(50));
    r.cancel();
    assert!(matches!(writer.join().unwrap(), Err(RelayError::Cancelled)));
    assert!(r.has_data_now());
}

#[test]
fn dropping_reader_releases_writer() {
    let (mut w, r) = channel::<u32>(1);
    w.write(1).unwrap();
    drop(r);
    assert!(matches!(w.write(2), Err(RelayError::Cancelled)));
}

#[test]
#[should_panic(expected = "relay capacity must be > 0")]
fn zero_capacity_panics() {
    let _ = channel::<u32>(0);
}

// -------------------- RecordSource --------------------

#[test]
fn reader_is_a_record_source() {
    let (mut w, r) = channel::<u64>(8);
    let mut src = r.named("upstream-3");
    assert_eq!(src.name(), "upstream-3");
    assert!(!RecordSource::has_data_now(&src));

    w.write(5).unwrap();
    w.write(6).unwrap();
    w.finish();
    assert!(RecordSource::has_data_now(&src));

    assert_eq!(src.next_new().unwrap(), Some(5));
    let mut scratch = 0u64;
    assert!(src.next_into(&mut scratch).unwrap());
    assert_eq!(scratch, 6);
    assert!(!src.next_into(&mut scratch).unwrap());
    assert_eq!(src.progress(), 1.0);
    src.close().unwrap();
    src.close().unwrap();
}

// -------------------- Pipelined tasks --------------------

#[test]
fn pipelined_task_consumes_everything() {
    let mut task = PipelinedTask::spawn("sum", 4, |mut input| {
        let mut total = 0u64;
        while let Some(v) = input.read()? {
            total += v;
        }
        Ok(total)
    })
    .unwrap();
    assert_eq!(task.name(), "sum");
    for v in 1..=100u64 {
        task.push(v).unwrap();
    }
    assert_eq!(task.finish().unwrap(), 5050);
}

#[test]
fn failing_task_surfaces_error_on_finish() {
    let mut task = PipelinedTask::<u32, ()>::spawn("fail", 1, |mut input| {
        input.read()?;
        anyhow::bail!("bad record")
    })
    .unwrap();
    // The task stops reading after the first record; later pushes fail.
    let mut pushed = 0;
    for v in 0..100 {
        if task.push(v).is_err() {
            break;
        }
        pushed += 1;
    }
    assert!(pushed < 100);
    match task.finish() {
        Err(RelayError::Task(e)) => assert!(e.to_string().contains("bad record")),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

#[test]
fn panicking_task_is_reported() {
    let task = PipelinedTask::<u32, ()>::spawn("panic", 1, |_input| panic!("boom")).unwrap();
    assert!(matches!(task.finish(), Err(RelayError::Panicked)));
}

#[test]
fn abort_stops_a_blocked_task() {
    let mut task = PipelinedTask::<u32, u64>::spawn("slow", 2, |mut input| {
        let mut n = 0;
        while input.read()?.is_some() {
            n += 1;
        }
        Ok(n)
    })
    .unwrap();
    task.push(1).unwrap();
    task.abort();
}
