use crate::cancel::CancelToken;
use crate::model::HashedFile;
use crate::scan::send_or_cancel;
use crossbeam_channel::{select, Receiver, Sender};
use std::collections::{HashMap, HashSet};
use std::thread::{self, JoinHandle};

/// Collision filter over prefix hashes, single-threaded.
///
/// Same two-phase emit rule as the size accumulator: the first file per
/// prefix hash is buffered; when a second file with the same prefix arrives
/// both are emitted, and later arrivals pass straight through. Files unique
/// by prefix are dropped; any duplicate of them would have collided here.
pub fn spawn_partial_hash_grouper(
    cancel: CancelToken,
    input: Receiver<HashedFile>,
    output: Sender<HashedFile>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut first: HashMap<String, HashedFile> = HashMap::new();
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            let hf = select! {
                recv(input) -> msg => match msg {
                    Ok(hf) => hf,
                    Err(_) => return,
                },
                recv(cancel.signal()) -> _ => return,
            };

            if seen.contains(&hf.hash) {
                if !send_or_cancel(&output, &cancel, hf) {
                    return;
                }
                continue;
            }

            if let Some(prev) = first.remove(&hf.hash) {
                seen.insert(hf.hash.clone());
                for f in [prev, hf] {
                    if !send_or_cancel(&output, &cancel, f) {
                        return;
                    }
                }
            } else {
                first.insert(hf.hash.clone(), hf);
            }
        }
    })
}
