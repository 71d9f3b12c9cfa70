//! Firmware API signal identifiers and header layout.
//!
//! Every signal exchanged with the on-chip subsystem starts with a 10-byte
//! little-endian header (`id`, `receiver_pid`, `sender_pid`, `fw_reference`),
//! followed by per-signal fields and an optional bulk-data region (`dr`).
//! The upper nibble of the signal id selects the service class; the next
//! nibble encodes the signal kind (request/confirm/response/indication).

/// Mask selecting the signal-kind nibble of a signal id.
pub const SIG_TYPE_MASK: u16 = 0x0F00;
pub const SIG_TYPE_REQ: u16 = 0x0000;
pub const SIG_TYPE_CFM: u16 = 0x0100;
pub const SIG_TYPE_RES: u16 = 0x0200;
pub const SIG_TYPE_IND: u16 = 0x0300;

/// Mask selecting the service-class nibble of a signal id.
pub const SAP_TYPE_MASK: u16 = 0xF000;
pub const SAP_TYPE_MA: u16 = 0x1000;
pub const SAP_TYPE_MLME: u16 = 0x2000;
pub const SAP_TYPE_DEBUG: u16 = 0x8000;
pub const SAP_TYPE_TEST: u16 = 0x9000;

/// Current SAP protocol versions, one per service class, plus the
/// engineering-build fallback. Compatibility is judged on the major byte.
pub const CONTROL_SAP_VERSION: u16 = 0x0d01;
pub const DATA_SAP_VERSION: u16 = 0x0d01;
pub const DEBUG_SAP_VERSION: u16 = 0x0d01;
pub const TEST_SAP_VERSION: u16 = 0x0d01;
pub const SAP_ENG_VERSION: u16 = 0x0000;

/// Major revision byte of a SAP version word.
#[inline]
#[must_use]
pub const fn sap_major(version: u16) -> u8 {
    (version >> 8) as u8
}

// Data service (MA) signals.
pub const MA_UNITDATA_REQ: u16 = 0x1000;
pub const MA_UNITDATA_CFM: u16 = 0x1100;
pub const MA_UNITDATA_IND: u16 = 0x1300;
pub const MA_BLOCKACK_IND: u16 = 0x1301;

// Control service (MLME) indications handled by the control drain.
pub const MLME_SCAN_IND: u16 = 0x2300;
pub const MLME_SCAN_DONE_IND: u16 = 0x2301;
pub const MLME_CONNECT_IND: u16 = 0x2303;
pub const MLME_CONNECTED_IND: u16 = 0x2304;
pub const MLME_DISCONNECT_IND: u16 = 0x2308;
pub const MLME_DISCONNECTED_IND: u16 = 0x2309;
pub const MLME_PROCEDURE_STARTED_IND: u16 = 0x230a;
pub const MLME_MIC_FAILURE_IND: u16 = 0x230b;
pub const MLME_FRAME_TRANSMISSION_IND: u16 = 0x230c;
pub const MLME_RECEIVED_FRAME_IND: u16 = 0x230d;

// Unit-descriptor values carried by ma_unitdata signals.
pub const DATAUNIT_IEEE802_11_FRAME: u16 = 0x0000;
pub const DATAUNIT_IEEE802_3_FRAME: u16 = 0x0001;
pub const DATAUNIT_AMSDU_SUBFRAME: u16 = 0x0002;
pub const DATAUNIT_AMSDU: u16 = 0x0003;

/// Transmission status reported in confirm signals. Zero is success.
pub const TX_STATUS_SUCCESSFUL: u16 = 0x0000;

/// Block-ack reason code that begins a reorder session; any other value
/// tears the session down.
pub const REASONCODE_START: u16 = 0x0001;

/// Length of the common signal header preceding per-signal fields.
pub const SIGNAL_HEADER_LEN: usize = 10;

/// Byte offset of the signal id within the header.
pub const SIGNAL_ID_OFFSET: usize = 0;

/// Field offsets of `ma_unitdata_ind`, relative to the start of the signal.
pub mod ma_unitdata_ind {
    pub const VIF: usize = 10;
    pub const DATA_UNIT_DESCRIPTOR: usize = 12;
    pub const SEQUENCE_NUMBER: usize = 14;
    pub const PRIORITY: usize = 16;
    pub const PEER_INDEX: usize = 18;
    pub const DR: usize = 34;
}

/// Field offsets of `ma_unitdata_cfm`.
pub mod ma_unitdata_cfm {
    pub const VIF: usize = 10;
    pub const TRANSMISSION_STATUS: usize = 12;
    pub const HOST_TAG: usize = 14;
    pub const SEQUENCE_NUMBER: usize = 16;
    pub const PEER_INDEX: usize = 18;
    pub const DR: usize = 32;
}

/// Field offsets of `ma_blockack_ind`.
pub mod ma_blockack_ind {
    pub const VIF: usize = 10;
    pub const PEER_QSTA_ADDRESS: usize = 12;
    pub const SEQUENCE_NUMBER: usize = 18;
    pub const REASON_CODE: usize = 20;
    pub const BLOCKACK_PARAMETER_SET: usize = 22;
    pub const DIRECTION: usize = 24;
    pub const DR: usize = 38;
}

/// Field offsets of `mlme_scan_ind`.
pub mod mlme_scan_ind {
    pub const VIF: usize = 10;
    pub const CHANNEL_FREQUENCY: usize = 12;
    pub const RSSI: usize = 14;
    pub const SCAN_ID: usize = 16;
    pub const DR: usize = 36;
}

/// Field offsets of `mlme_scan_done_ind`.
pub mod mlme_scan_done_ind {
    pub const VIF: usize = 10;
    pub const SCAN_ID: usize = 12;
    pub const DR: usize = 26;
}

/// Field offsets of `mlme_connect_ind`.
pub mod mlme_connect_ind {
    pub const VIF: usize = 10;
    pub const RESULT_CODE: usize = 12;
    pub const DR: usize = 26;
}

/// Field offsets of `mlme_connected_ind`.
pub mod mlme_connected_ind {
    pub const VIF: usize = 10;
    pub const PEER_INDEX: usize = 12;
    pub const DR: usize = 26;
}

/// Field offsets of `mlme_disconnected_ind`.
pub mod mlme_disconnected_ind {
    pub const VIF: usize = 10;
    pub const PEER_STA_ADDRESS: usize = 12;
    pub const REASON_CODE: usize = 18;
    pub const DR: usize = 32;
}

/// Field offsets of `mlme_procedure_started_ind`.
pub mod mlme_procedure_started_ind {
    pub const VIF: usize = 10;
    pub const PROCEDURE_TYPE: usize = 12;
    pub const PEER_INDEX: usize = 14;
    pub const DR: usize = 28;
}

/// Field offsets of `mlme_mic_failure_ind`.
pub mod mlme_mic_failure_ind {
    pub const VIF: usize = 10;
    pub const PEER_STA_ADDRESS: usize = 12;
    pub const KEY_TYPE: usize = 18;
    pub const KEY_ID: usize = 20;
    pub const DR: usize = 50;
}

/// Field offsets of `mlme_frame_transmission_ind`.
pub mod mlme_frame_transmission_ind {
    pub const VIF: usize = 10;
    pub const HOST_TAG: usize = 12;
    pub const TRANSMISSION_STATUS: usize = 14;
    pub const DR: usize = 28;
}

/// Field offsets of `mlme_received_frame_ind`.
pub mod mlme_received_frame_ind {
    pub const VIF: usize = 10;
    pub const DATA_UNIT_DESCRIPTOR: usize = 12;
    pub const CHANNEL_FREQUENCY: usize = 14;
    pub const DR: usize = 28;
}

/// Minimum length of a signal, including its fixed fields but not bulk data.
///
/// Returns `None` for ids this subsystem does not decode fields from; those
/// only need the common header.
#[must_use]
pub fn expected_signal_len(id: u16) -> Option<usize> {
    let len = match id {
        MA_UNITDATA_IND => ma_unitdata_ind::DR,
        MA_UNITDATA_CFM => ma_unitdata_cfm::DR,
        MA_BLOCKACK_IND => ma_blockack_ind::DR,
        MLME_SCAN_IND => mlme_scan_ind::DR,
        MLME_SCAN_DONE_IND => mlme_scan_done_ind::DR,
        MLME_CONNECT_IND => mlme_connect_ind::DR,
        MLME_CONNECTED_IND => mlme_connected_ind::DR,
        MLME_DISCONNECTED_IND => mlme_disconnected_ind::DR,
        MLME_PROCEDURE_STARTED_IND => mlme_procedure_started_ind::DR,
        MLME_MIC_FAILURE_IND => mlme_mic_failure_ind::DR,
        MLME_FRAME_TRANSMISSION_IND => mlme_frame_transmission_ind::DR,
        MLME_RECEIVED_FRAME_IND => mlme_received_frame_ind::DR,
        _ => return None,
    };
    Some(len)
}

/// WMM access category, indexed BK=0, BE=1, VI=2, VO=3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AccessCategory {
    Bk = 0,
    Be = 1,
    Vi = 2,
    Vo = 3,
}

impl AccessCategory {
    pub const COUNT: usize = 4;

    /// Maps a QoS user priority (0..=7) to its access category.
    #[must_use]
    pub const fn from_priority(up: u16) -> Self {
        match up & 0x7 {
            1 | 2 => Self::Bk,
            0 | 3 => Self::Be,
            4 | 5 => Self::Vi,
            _ => Self::Vo,
        }
    }

    /// Recovers an access category from its queue index, masking to range.
    #[must_use]
    pub const fn from_index(idx: u16) -> Self {
        match idx & 0x3 {
            0 => Self::Bk,
            1 => Self::Be,
            2 => Self::Vi,
            _ => Self::Vo,
        }
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_nibble_selects_service() {
        assert_eq!(MA_UNITDATA_IND & SAP_TYPE_MASK, SAP_TYPE_MA);
        assert_eq!(MLME_SCAN_DONE_IND & SAP_TYPE_MASK, SAP_TYPE_MLME);
        assert_eq!(MA_UNITDATA_IND & SIG_TYPE_MASK, SIG_TYPE_IND);
        assert_eq!(MA_UNITDATA_CFM & SIG_TYPE_MASK, SIG_TYPE_CFM);
    }

    #[test]
    fn priority_to_ac_follows_wmm() {
        assert_eq!(AccessCategory::from_priority(0), AccessCategory::Be);
        assert_eq!(AccessCategory::from_priority(1), AccessCategory::Bk);
        assert_eq!(AccessCategory::from_priority(2), AccessCategory::Bk);
        assert_eq!(AccessCategory::from_priority(3), AccessCategory::Be);
        assert_eq!(AccessCategory::from_priority(4), AccessCategory::Vi);
        assert_eq!(AccessCategory::from_priority(5), AccessCategory::Vi);
        assert_eq!(AccessCategory::from_priority(6), AccessCategory::Vo);
        assert_eq!(AccessCategory::from_priority(7), AccessCategory::Vo);
    }

    #[test]
    fn version_majors() {
        assert_eq!(sap_major(CONTROL_SAP_VERSION), 0x0d);
        assert_eq!(sap_major(SAP_ENG_VERSION), 0x00);
    }
}
