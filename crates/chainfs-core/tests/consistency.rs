#![forbid(unsafe_code)]
//! Structural checks that must hold after every successful operation:
//! reachability, refcount accounting, allocator agreement, chain
//! capacity bounds, and dump/load stability. A deterministic walk is
//! cross-checked here after scripted and generated operation sequences.

use chainfs_core::FileSystem;
use chainfs_types::{BLOCK_PAYLOAD, InodeIndex};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Walk the tree from the root and verify every cross-structure
/// invariant the engine promises.
fn assert_consistent(fs: &FileSystem) {
    let image = fs.image();
    let n = image.slot_count();

    let mut dir_queue = VecDeque::from([InodeIndex::ROOT]);
    let mut dirs = BTreeSet::from([0u16]);
    let mut files = BTreeSet::new();
    let mut entry_refs: BTreeMap<u16, u8> = BTreeMap::new();
    let mut own_entries: BTreeMap<u16, u8> = BTreeMap::new();

    while let Some(ino) = dir_queue.pop_front() {
        let head = image.inodes.head(ino).expect("directory head");
        let payload = image.store.read_chain(head).expect("directory payload");
        let entries = chainfs_dir::decode(&payload).expect("directory entries");
        own_entries.insert(ino.0, u8::try_from(entries.len()).expect("entry count"));

        for entry in entries {
            *entry_refs.entry(entry.inode.0).or_default() += 1;
            if image.inodes.is_dir(entry.inode).expect("entry kind") {
                assert!(
                    dirs.insert(entry.inode.0),
                    "directory {} reachable by more than one path",
                    entry.inode
                );
                dir_queue.push_back(entry.inode);
            } else {
                files.insert(entry.inode.0);
            }
        }
    }

    // Live inodes and the inode allocator agree exactly.
    let live: BTreeSet<u16> = dirs.union(&files).copied().collect();
    for idx in 0..n {
        assert_eq!(
            image.inode_alloc.is_free(idx),
            !live.contains(&idx),
            "inode allocator disagrees about slot {idx}"
        );
    }

    // Chains partition the used-block set; each chain obeys the
    // at-most-one-spare-trailing-block bound.
    let mut used_blocks = BTreeSet::new();
    for ino in &live {
        let ino = InodeIndex(*ino);
        let head = image.inodes.head(ino).expect("inode head");
        let chain = image.store.chain_blocks(head).expect("chain walk");
        for block in &chain {
            assert!(
                used_blocks.insert(block.0),
                "block {block} belongs to more than one chain"
            );
        }

        let len = image.store.read_chain(head).expect("chain payload").len();
        let capacity = chain.len() * BLOCK_PAYLOAD;
        assert!(len <= capacity, "payload overflows chain of inode {ino}");
        assert!(
            capacity < len + BLOCK_PAYLOAD || (len == 0 && chain.len() == 1),
            "chain of inode {ino} carries spare blocks: {len} bytes in {} blocks",
            chain.len()
        );
    }
    for idx in 0..n {
        assert_eq!(
            image.block_alloc.is_free(idx),
            !used_blocks.contains(&idx),
            "block allocator disagrees about block {idx}"
        );
    }

    // Refcount law: files count their links; directories count their
    // entries plus the parent link (the root has none).
    for idx in &live {
        let ino = InodeIndex(*idx);
        let refcount = image.inodes.refcount(ino).expect("refcount");
        let expected = if dirs.contains(idx) {
            own_entries.get(idx).copied().unwrap_or(0) + u8::from(*idx != 0)
        } else {
            entry_refs.get(idx).copied().unwrap_or(0)
        };
        assert_eq!(refcount, expected, "refcount of inode {ino}");
    }
}

fn assert_dump_stable(fs: &FileSystem) {
    let dumped = fs.to_bytes();
    let reloaded = FileSystem::from_bytes(&dumped).expect("reload");
    assert_eq!(reloaded.to_bytes(), dumped);
}

#[test]
fn scripted_session_stays_consistent() {
    let mut fs = FileSystem::create(400).expect("fresh image");
    assert_consistent(&fs);

    fs.touch(&[], "a").expect("touch a");
    fs.mkdir(&[], "d").expect("mkdir d");
    fs.touch(&["d", "sub"], "leaf").expect("auto-create");
    assert_consistent(&fs);

    fs.write(&["d", "sub"], "leaf", &[1u8; 160]).expect("write");
    fs.link(&["d", "sub"], "leaf", &[], "leaf2").expect("link");
    assert_consistent(&fs);

    fs.cut(&["d", "sub"], "leaf", 140).expect("cut");
    assert_consistent(&fs);

    fs.erase(&["d", "sub"], "leaf").expect("erase one link");
    assert_consistent(&fs);

    fs.erase(&[], "leaf2").expect("erase last link");
    fs.erase(&["d"], "sub").expect("erase emptied dir");
    assert_consistent(&fs);
    assert_dump_stable(&fs);
}

#[test]
fn failed_operations_leave_consistent_state() {
    let mut fs = FileSystem::create(400).expect("fresh image");
    fs.touch(&[], "f").expect("touch");
    fs.mkdir(&[], "d").expect("mkdir");
    fs.touch(&["d"], "inner").expect("touch inner");

    assert!(fs.touch(&[], "f").is_err()); // duplicate
    assert!(fs.erase(&[], "d").is_err()); // not empty
    assert!(fs.link(&[], "d", &[], "dl").is_err()); // directory link
    assert!(fs.read(&[], "ghost").is_err()); // missing
    assert!(fs.touch(&["f"], "x").is_err()); // file in path

    assert_consistent(&fs);
    assert_dump_stable(&fs);
}

// ── Generated operation sequences ───────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Touch(usize, usize),
    Mkdir(usize, usize),
    Write(usize, usize, usize),
    Cut(usize, usize, usize),
    Erase(usize, usize),
    Link(usize, usize, usize, usize),
}

const NAMES: [&str; 4] = ["a", "b", "c", "d"];
const PARENTS: [&[&str]; 4] = [&[], &["p"], &["p", "q"], &["r"]];

fn op_strategy() -> impl Strategy<Value = Op> {
    let parent = 0..PARENTS.len();
    let name = 0..NAMES.len();
    prop_oneof![
        (parent.clone(), name.clone()).prop_map(|(p, n)| Op::Touch(p, n)),
        (parent.clone(), name.clone()).prop_map(|(p, n)| Op::Mkdir(p, n)),
        (parent.clone(), name.clone(), 0usize..200).prop_map(|(p, n, len)| Op::Write(p, n, len)),
        (parent.clone(), name.clone(), 0usize..220).prop_map(|(p, n, cut)| Op::Cut(p, n, cut)),
        (parent.clone(), name.clone()).prop_map(|(p, n)| Op::Erase(p, n)),
        (parent.clone(), name.clone(), parent, name)
            .prop_map(|(sp, sn, dp, dn)| Op::Link(sp, sn, dp, dn)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever sequence of operations runs, and whether each succeeds
    /// or fails, the structural invariants and dump stability hold.
    #[test]
    fn generated_sessions_stay_consistent(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let mut fs = FileSystem::create(2048).expect("fresh image");

        for op in ops {
            // Individual operations may fail (duplicates, missing names,
            // kind mismatches); the state must stay coherent either way.
            let _ = match op {
                Op::Touch(p, n) => fs.touch(PARENTS[p], NAMES[n]),
                Op::Mkdir(p, n) => fs.mkdir(PARENTS[p], NAMES[n]),
                Op::Write(p, n, len) => fs.write(PARENTS[p], NAMES[n], &vec![7u8; len]),
                Op::Cut(p, n, cut) => fs.cut(PARENTS[p], NAMES[n], cut),
                Op::Erase(p, n) => fs.erase(PARENTS[p], NAMES[n]),
                Op::Link(sp, sn, dp, dn) => fs.link(PARENTS[sp], NAMES[sn], PARENTS[dp], NAMES[dn]),
            };
            assert_consistent(&fs);
        }

        assert_dump_stable(&fs);
    }
}
