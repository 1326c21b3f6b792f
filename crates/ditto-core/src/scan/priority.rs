use crate::cancel::CancelToken;
use crate::model::HashedFile;
use crate::scan::send_or_cancel;
use crossbeam_channel::{select, Receiver, Sender};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::thread::{self, JoinHandle};

/// Heap entry ordered so that the smallest file size is the heap maximum
/// (`BinaryHeap` pops its maximum).
struct SmallestFirst(HashedFile);

impl PartialEq for SmallestFirst {
    fn eq(&self, other: &Self) -> bool {
        self.0.file.size == other.0.file.size
    }
}

impl Eq for SmallestFirst {}

impl PartialOrd for SmallestFirst {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SmallestFirst {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.file.size.cmp(&self.0.file.size)
    }
}

/// Size-priority stage between the grouper and the full hashers.
///
/// While the heap holds items, three events race: accept an incoming file,
/// dispatch the current minimum downstream, or observe cancellation. With an
/// empty heap it blocks on input. Smallest-first dispatch maximises
/// completed hashes per unit wall-clock early in the scan; it is not a
/// global sort, and items already handed downstream are never recalled.
pub fn spawn_size_priority_queue(
    cancel: CancelToken,
    input: Receiver<HashedFile>,
    output: Sender<HashedFile>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut heap: BinaryHeap<SmallestFirst> = BinaryHeap::new();

        loop {
            if heap.is_empty() {
                select! {
                    recv(input) -> msg => match msg {
                        Ok(hf) => heap.push(SmallestFirst(hf)),
                        Err(_) => return,
                    },
                    recv(cancel.signal()) -> _ => return,
                }
            } else {
                select! {
                    recv(input) -> msg => match msg {
                        Ok(hf) => heap.push(SmallestFirst(hf)),
                        Err(_) => {
                            // Input closed; drain the heap smallest-first.
                            while let Some(SmallestFirst(hf)) = heap.pop() {
                                if !send_or_cancel(&output, &cancel, hf) {
                                    return;
                                }
                            }
                            return;
                        }
                    },
                    send(output, heap.pop().map(|SmallestFirst(hf)| hf).unwrap()) -> res => {
                        if res.is_err() {
                            return;
                        }
                    }
                    recv(cancel.signal()) -> _ => return,
                }
            }
        }
    })
}
