//! Static application rules.
//!
//! Decides per program whether its result may be served from the cache.

/// Programs whose outputs are fully determined by their tracked inputs.
const CACHEABLE_PROGRAMS: &[&str] = &[
    "cl.exe",
    "lib.exe",
    "mt.exe",
    "rc.exe",
    "clang++.exe",
    "clang-cl.exe",
    "verse-clang-cl.exe",
    "ispc.exe",
    "clang++",
    "ispc",
];

/// File name of an application path, lower-cased.
pub fn program_name(application: &str) -> String {
    application
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(application)
        .to_lowercase()
}

/// Whether actions running `application` are eligible for a cache probe.
pub fn is_cacheable(application: &str) -> bool {
    let name = program_name(application);
    CACHEABLE_PROGRAMS.contains(&name.as_str())
}
