// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Random trace names of the form `adjective-noun-nnnn`.

use uuid::Uuid;

const ADJECTIVES: &[&str] = &[
    "amber", "brave", "calm", "clever", "crisp", "dapper", "eager", "fuzzy", "gentle", "glad",
    "hazy", "jolly", "keen", "lively", "lucky", "mellow", "nimble", "plucky", "quiet", "rapid",
    "rustic", "shiny", "snappy", "steady", "sunny", "swift", "tidy", "vivid", "witty", "zesty",
];

const NOUNS: &[&str] = &[
    "badger", "beagle", "bison", "crane", "falcon", "ferret", "gecko", "heron", "ibis", "jackal",
    "koala", "lemur", "lynx", "marten", "moose", "newt", "otter", "panda", "quokka", "raven",
    "robin", "salmon", "tapir", "toucan", "turtle", "vole", "walrus", "wombat", "yak", "zebra",
];

/// A fresh random name, e.g. `swift-otter-0421`.
pub fn random_trace_name() -> String {
    name_from_bytes(Uuid::new_v4().as_bytes())
}

fn name_from_bytes(bytes: &[u8; 16]) -> String {
    let adjective = ADJECTIVES[bytes[0] as usize % ADJECTIVES.len()];
    let noun = NOUNS[bytes[1] as usize % NOUNS.len()];
    let number = u16::from_le_bytes([bytes[2], bytes[3]]) % 10_000;
    format!("{}-{}-{:04}", adjective, noun, number)
}
