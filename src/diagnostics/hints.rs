// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-build :: diagnostics :: hints
//
//  Compiler messages caused by Arduino 1.0 API breaks, keyed by the exact
//  trimmed message text, with the headline and explanation shown instead.
// ─────────────────────────────────────────────────────────────────────────────

/// One known-message rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hint {
    pub message: &'static str,
    pub error:   &'static str,
    pub note:    Option<&'static str>,
}

/// Result of looking a message up in the tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rewrite {
    pub error: Option<&'static str>,
    pub note:  Option<&'static str>,
}

impl Rewrite {
    pub fn is_empty(&self) -> bool {
        self.error.is_none() && self.note.is_none()
    }
}

/// The core whose USB personality is picked from a menu rather than by library.
pub const USB_TYPE_CORE: &str = "teensy";

pub static HINTS: &[Hint] = &[
    Hint {
        message: "SPI.h: No such file or directory",
        error:   "Please import the SPI library from the Sketch > Import Library menu.",
        note:    Some("As of Arduino 0019, the Ethernet library depends on the SPI library.\n\
                       You appear to be using it or another library that depends on the SPI library."),
    },
    Hint {
        message: "'BYTE' was not declared in this scope",
        error:   "The 'BYTE' keyword is no longer supported.",
        note:    Some("As of Arduino 1.0, the 'BYTE' keyword is no longer supported.\n\
                       Please use Serial.write() instead."),
    },
    Hint {
        message: "no matching function for call to 'Server::Server(int)'",
        error:   "The Server class has been renamed EthernetServer.",
        note:    Some("As of Arduino 1.0, the Server class in the Ethernet library has been renamed to EthernetServer."),
    },
    Hint {
        message: "no matching function for call to 'Client::Client(byte [4], int)'",
        error:   "The Client class has been renamed EthernetClient.",
        note:    Some("As of Arduino 1.0, the Client class in the Ethernet library has been renamed to EthernetClient."),
    },
    Hint {
        message: "'Udp' was not declared in this scope",
        error:   "The Udp class has been renamed EthernetUdp.",
        note:    Some("As of Arduino 1.0, the Udp class in the Ethernet library has been renamed to EthernetUdp."),
    },
    Hint {
        message: "'class TwoWire' has no member named 'send'",
        error:   "Wire.send() has been renamed Wire.write().",
        note:    Some("As of Arduino 1.0, the Wire.send() function was renamed to Wire.write() for consistency with other libraries."),
    },
    Hint {
        message: "'class TwoWire' has no member named 'receive'",
        error:   "Wire.receive() has been renamed Wire.read().",
        note:    Some("As of Arduino 1.0, the Wire.receive() function was renamed to Wire.read() for consistency with other libraries."),
    },
    Hint {
        message: "'Mouse' was not declared in this scope",
        error:   "'Mouse' only supported on the Arduino Leonardo",
        note:    None,
    },
    Hint {
        message: "'Keyboard' was not declared in this scope",
        error:   "'Keyboard' only supported on the Arduino Leonardo",
        note:    None,
    },
];

/// Notes for [`USB_TYPE_CORE`]: the class exists once the matching USB type is selected.
pub static USB_TYPE_HINTS: &[(&str, &str)] = &[
    ("'Keyboard' was not declared in this scope",
     "To make a USB Keyboard, please select Keyboard from the Tools -> USB Type menu"),
    ("'Mouse' was not declared in this scope",
     "To make a USB Mouse, please select Mouse from the Tools -> USB Type menu"),
    ("'Joystick' was not declared in this scope",
     "To make a USB Joystick, please select Joystick from the Tools -> USB Type menu"),
    ("'Disk' was not declared in this scope",
     "To make a USB Disk, please select Disk from the Tools -> USB Type menu"),
    ("'usbMIDI' was not declared in this scope",
     "To make a USB MIDI device, please select MIDI from the Tools -> USB Type menu"),
    ("'RawHID' was not declared in this scope",
     "To make a RawHID device, please select RawHID from the Tools -> USB Type menu"),
    ("'FlightSimCommand' does not name a type",
     "To make a Flight Simulator device, please select Flight Sim Controls from the Tools -> USB Type menu"),
    ("'FlightSimInteger' does not name a type",
     "To make a Flight Simulator device, please select Flight Sim Controls from the Tools -> USB Type menu"),
    ("'FlightSimFloat' does not name a type",
     "To make a Flight Simulator device, please select Flight Sim Controls from the Tools -> USB Type menu"),
    ("'FlightSim' was not declared in this scope",
     "To make a Flight Simulator device, please select Flight Sim Controls from the Tools -> USB Type menu"),
];

/// Whole-line link failures: (needle, needle, headline).
pub static LINK_HINTS: &[(&str, &str, &str)] = &[
    ("undefined reference to `SPIClass::begin()'", "libraries/Robot_Control",
     "Please import the SPI library from the Sketch > Import Library menu."),
    ("undefined reference to `Wire'", "libraries/Robot_Control",
     "Please import the Wire library from the Sketch > Import Library menu."),
];

/// Look up a compiler message (already extracted from an `error:` line).
pub fn lookup(message: &str, core: Option<&str>) -> Rewrite {
    let message = message.trim();
    let mut rewrite = HINTS
        .iter()
        .find(|h| h.message == message)
        .map(|h| Rewrite { error: Some(h.error), note: h.note })
        .unwrap_or_default();

    if core == Some(USB_TYPE_CORE) {
        // newer gcc quotes identifiers with ‘…’
        let plain = message.replace(['\u{2018}', '\u{2019}'], "'");
        if let Some((_, note)) = USB_TYPE_HINTS.iter().find(|(m, _)| *m == plain) {
            rewrite.note = Some(note);
        }
    }
    rewrite
}

/// Headline for a link-stage line, if it matches a known missing-library failure.
pub fn link_hint(line: &str) -> Option<&'static str> {
    LINK_HINTS
        .iter()
        .find(|(a, b, _)| line.contains(a) && line.contains(b))
        .map(|(_, _, headline)| *headline)
}
