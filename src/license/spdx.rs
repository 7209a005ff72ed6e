use std::sync::LazyLock;

use regex::Regex;

/// Normalize common non-SPDX strings to their SPDX equivalents.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed {
        "Apache 2.0" | "Apache License 2.0" | "Apache License, Version 2.0" | "Apache-2"
        | "Apache 2" | "The Apache Software License, Version 2.0"
        | "The Apache License, Version 2.0" | "Apache Software License" => {
            "Apache-2.0".to_string()
        }
        "MIT License" | "The MIT License" | "MIT license" | "Expat" => "MIT".to_string(),
        "BSD" | "BSD License" => "BSD-3-Clause".to_string(),
        "BSD 2-Clause" | "Simplified BSD" | "BSD-2" => "BSD-2-Clause".to_string(),
        "BSD 3-Clause" | "New BSD" | "Modified BSD" | "BSD-3" | "New BSD License" => {
            "BSD-3-Clause".to_string()
        }
        "GNU GPL v2" | "GNU General Public License v2" | "GPL v2" | "GPLv2" => {
            "GPL-2.0".to_string()
        }
        "GNU GPL v3" | "GNU General Public License v3" | "GPL v3" | "GPLv3" => {
            "GPL-3.0".to_string()
        }
        "GNU LGPL v2.1" | "LGPL v2.1" | "LGPLv2.1" => "LGPL-2.1".to_string(),
        "GNU LGPL v3" | "LGPL v3" | "LGPLv3" => "LGPL-3.0".to_string(),
        "Mozilla Public License 2.0" | "MPL 2.0" | "MPLv2" => "MPL-2.0".to_string(),
        "ISC License" => "ISC".to_string(),
        "CC0" | "Public Domain" => "CC0-1.0".to_string(),
        "AGPL v3" | "AGPLv3" | "GNU AGPL v3" => "AGPL-3.0".to_string(),
        "UNKNOWN" | "Unknown" | "unknown" | "NOASSERTION" => String::new(),
        other => other.to_string(),
    }
}

static UNITY_LICENSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Unity\s[\s\w]*\sLicense").expect("static regex"));

/// Header phrases of the license texts most often shipped next to a package.
/// Checked in order; the more specific text comes first.
const TEXT_MARKERS: &[(&[&str], &str)] = &[
    (&["GNU AFFERO GENERAL PUBLIC LICENSE", "Version 3"], "AGPL-3.0"),
    (&["GNU LESSER GENERAL PUBLIC LICENSE", "Version 3"], "LGPL-3.0"),
    (&["GNU LESSER GENERAL PUBLIC LICENSE", "Version 2.1"], "LGPL-2.1"),
    (&["GNU GENERAL PUBLIC LICENSE", "Version 3"], "GPL-3.0"),
    (&["GNU GENERAL PUBLIC LICENSE", "Version 2"], "GPL-2.0"),
    (&["Apache License", "Version 2.0"], "Apache-2.0"),
    (&["Mozilla Public License", "2.0"], "MPL-2.0"),
    (&["Permission is hereby granted, free of charge"], "MIT"),
    (
        &["Permission to use, copy, modify, and/or distribute this software for any purpose"],
        "ISC",
    ),
    (
        &["Redistribution and use in source and binary forms", "Neither the name"],
        "BSD-3-Clause",
    ),
    (&["Redistribution and use in source and binary forms"], "BSD-2-Clause"),
    (&["This is free and unencumbered software released into the public domain"], "Unlicense"),
];

/// Guess the license of a LICENSE file from its text.
pub fn detect_from_text(text: &str) -> Option<String> {
    if let Some(m) = UNITY_LICENSE.find(text) {
        return Some(m.as_str().split_whitespace().collect::<Vec<_>>().join(" "));
    }
    TEXT_MARKERS
        .iter()
        .find(|(needles, _)| needles.iter().all(|n| text.contains(n)))
        .map(|(_, id)| id.to_string())
}
