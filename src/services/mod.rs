pub mod change_detector;
pub mod enumerator;
pub mod folder_service;
pub mod ocr_service;
pub mod scan_service;
pub mod search_service;
pub mod settings_service;
pub mod storage_access;
