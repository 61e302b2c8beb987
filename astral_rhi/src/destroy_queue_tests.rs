use super::*;

#[test]
fn releases_after_in_flight_frames_retire() {
    let mut queue = DestroyQueue::new();
    let mut released = Vec::new();

    queue.push("a", 0);
    queue.update(1, 2, |p| released.push(p));
    assert!(released.is_empty());

    // Frame 0 + 2 frames in flight retire at frame 2
    queue.update(2, 2, |p| released.push(p));
    assert_eq!(released, vec!["a"]);
    assert!(queue.is_empty());
}

#[test]
fn releases_in_fifo_order() {
    let mut queue = DestroyQueue::new();
    let mut released = Vec::new();

    queue.push(1, 0);
    queue.push(2, 0);
    queue.push(3, 1);

    queue.update(2, 2, |p| released.push(p));
    assert_eq!(released, vec![1, 2]);

    queue.update(3, 2, |p| released.push(p));
    assert_eq!(released, vec![1, 2, 3]);
}

#[test]
fn partial_release_keeps_newer_entries() {
    let mut queue = DestroyQueue::new();
    queue.push("old", 0);
    queue.push("new", 5);

    let mut released = Vec::new();
    queue.update(4, 2, |p| released.push(p));
    assert_eq!(released, vec!["old"]);
    assert_eq!(queue.len(), 1);
}

#[test]
fn drain_ignores_frames() {
    let mut queue = DestroyQueue::new();
    queue.push("a", 10);
    queue.push("b", 11);

    let mut released = Vec::new();
    queue.drain(|p| released.push(p));
    assert_eq!(released, vec!["a", "b"]);
    assert!(queue.is_empty());
}

#[test]
fn update_on_empty_queue_is_a_no_op() {
    let mut queue: DestroyQueue<u32> = DestroyQueue::new();
    queue.update(100, 2, |_| panic!("nothing to release"));
}
