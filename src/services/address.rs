//! Address resolution with a bundled fallback table.

use std::sync::Arc;

use validator::Validate;

use crate::domain::aggregates::{Region, ResolvedAddress, ShippingAddressInput};
use crate::domain::value_objects::{AddressCode, AddressLevel};
use crate::services::AddressService;
use crate::{Result, StorefrontError};

/// Raw code as it appears in the bundled table, which mixes strings and numbers.
#[derive(Clone, Copy, Debug)]
enum Code {
    Num(u64),
    Text(&'static str),
}

impl Code {
    fn normalize(self, level: AddressLevel) -> AddressCode {
        match self {
            Code::Num(n) => AddressCode::numeric(level, n),
            Code::Text(s) => AddressCode::normalize(level, s),
        }
    }
}

use Code::{Num, Text};

type Rows = &'static [(Code, &'static str)];

const PROVINCES: Rows = &[
    (Text("01"), "Thành phố Hà Nội"),
    (Text("79"), "Thành phố Hồ Chí Minh"),
    (Text("31"), "Thành phố Hải Phòng"),
    (Text("48"), "Thành phố Đà Nẵng"),
    (Text("92"), "Thành phố Cần Thơ"),
    (Num(2), "Hà Giang"),
    (Num(11), "Điện Biên"),
    (Num(22), "Quảng Ninh"),
    (Num(38), "Thanh Hóa"),
    (Num(46), "Thừa Thiên Huế"),
    (Num(56), "Khánh Hòa"),
    (Num(68), "Lâm Đồng"),
    (Num(74), "Bình Dương"),
    (Num(75), "Đồng Nai"),
    (Num(89), "An Giang"),
    (Num(96), "Cà Mau"),
];

const DISTRICTS: &[(Code, Rows)] = &[
    (Text("01"), &[
        (Text("001"), "Quận Ba Đình"),
        (Text("002"), "Quận Hoàn Kiếm"),
        (Text("003"), "Quận Tây Hồ"),
        (Text("005"), "Quận Cầu Giấy"),
        (Text("006"), "Quận Đống Đa"),
        (Text("019"), "Quận Nam Từ Liêm"),
    ]),
    (Num(11), &[
        (Num(94), "Thành phố Điện Biên Phủ"),
        (Num(95), "Thị xã Mường Lay"),
        (Num(96), "Huyện Mường Nhé"),
    ]),
    (Num(79), &[
        (Num(760), "Quận 1"),
        (Num(770), "Quận Gò Vấp"),
        (Num(775), "Thành phố Thủ Đức"),
        (Num(783), "Quận 3"),
    ]),
    (Num(31), &[(Num(303), "Hồng Bàng"), (Num(304), "Ngô Quyền")]),
    (Num(48), &[(Num(490), "Liên Chiểu"), (Num(492), "Hải Châu")]),
    (Num(92), &[(Num(916), "Ninh Kiều"), (Num(919), "Cái Răng")]),
];

const WARDS: &[(Code, Rows)] = &[
    (Num(1), &[(Num(1), "Phúc Xá"), (Num(4), "Trúc Bạch"), (Num(6), "Vĩnh Phúc"), (Num(28), "Kim Mã")]),
    (Num(2), &[(Num(37), "Phúc Tân"), (Num(40), "Đồng Xuân"), (Num(79), "Tràng Tiền")]),
    (Num(94), &[(Num(3118), "Noong Bua"), (Num(3121), "Him Lam")]),
    (Num(95), &[(Num(3142), "Na Lay"), (Num(3145), "Lay Nưa")]),
    (Num(760), &[(Num(26734), "Tân Định"), (Num(26740), "Bến Nghé"), (Num(26743), "Bến Thành")]),
    (Num(783), &[(Num(27400), "Võ Thị Sáu")]),
    (Num(303), &[(Num(11299), "Quán Toan"), (Num(11302), "Hùng Vương")]),
    (Num(490), &[(Num(20194), "Hòa Hiệp Bắc"), (Num(20200), "Hòa Khánh Bắc")]),
    (Num(916), &[(Num(31117), "Cái Khế"), (Num(31120), "An Hòa")]),
];

/// Static province, district and ward table used when the live service is unavailable.
#[derive(Clone, Copy, Debug, Default)]
pub struct FallbackTable;

impl FallbackTable {
    pub fn provinces(&self) -> Vec<Region> { rows(PROVINCES, AddressLevel::Province) }

    pub fn districts(&self, province: &AddressCode) -> Vec<Region> {
        children(DISTRICTS, AddressLevel::Province, province, AddressLevel::District)
    }

    pub fn wards(&self, district: &AddressCode) -> Vec<Region> {
        children(WARDS, AddressLevel::District, district, AddressLevel::Ward)
    }
}

fn rows(rows: Rows, level: AddressLevel) -> Vec<Region> {
    rows.iter().map(|(code, name)| Region { code: code.normalize(level), name: (*name).to_string() }).collect()
}

fn children(table: &[(Code, Rows)], parent_level: AddressLevel, parent: &AddressCode, level: AddressLevel) -> Vec<Region> {
    table
        .iter()
        .find(|(code, _)| &code.normalize(parent_level) == parent)
        .map(|(_, entries)| rows(entries, level))
        .unwrap_or_default()
}

/// Looks up area names, preferring the live service and falling back to the
/// bundled table on error or an empty answer.
#[derive(Clone)]
pub struct AddressDirectory {
    service: Arc<dyn AddressService>,
    fallback: FallbackTable,
}

impl AddressDirectory {
    pub fn new(service: Arc<dyn AddressService>) -> Self {
        Self { service, fallback: FallbackTable }
    }

    pub async fn provinces(&self) -> Vec<Region> {
        let live = self.service.provinces().await;
        with_fallback("provinces", live, || self.fallback.provinces())
    }

    pub async fn districts(&self, province: &AddressCode) -> Vec<Region> {
        let live = self.service.districts(province).await;
        with_fallback("districts", live, || self.fallback.districts(province))
    }

    pub async fn wards(&self, district: &AddressCode) -> Vec<Region> {
        let live = self.service.wards(district).await;
        with_fallback("wards", live, || self.fallback.wards(district))
    }

    /// Validates the typed address and resolves its three area codes to names.
    #[tracing::instrument(skip_all)]
    pub async fn resolve(&self, input: &ShippingAddressInput) -> Result<ResolvedAddress> {
        input.validate().map_err(|e| StorefrontError::Validation(e.to_string()))?;

        let province_code = AddressCode::normalize(AddressLevel::Province, &input.province_code);
        let district_code = AddressCode::normalize(AddressLevel::District, &input.district_code);
        let ward_code = AddressCode::normalize(AddressLevel::Ward, &input.ward_code);

        let province = pick(self.provinces().await, &province_code, "province")?;
        let district = pick(self.districts(&province.code).await, &district_code, "district")?;
        let ward = pick(self.wards(&district.code).await, &ward_code, "ward")?;

        Ok(ResolvedAddress {
            full_name: input.full_name.trim().to_string(),
            phone: input.phone.trim().to_string(),
            email: input.email.clone().filter(|e| !e.trim().is_empty()),
            street: input.street.trim().to_string(),
            province,
            district,
            ward,
            postal_code: input.postal_code.clone().filter(|p| !p.trim().is_empty()),
        })
    }
}

fn with_fallback(what: &str, live: Result<Vec<Region>>, fallback: impl FnOnce() -> Vec<Region>) -> Vec<Region> {
    match live {
        Ok(regions) if !regions.is_empty() => regions,
        Ok(_) => {
            tracing::debug!(what, "address service returned nothing, using bundled table");
            fallback()
        }
        Err(e) => {
            tracing::warn!(what, error = %e, "address service unavailable, using bundled table");
            fallback()
        }
    }
}

fn pick(regions: Vec<Region>, code: &AddressCode, what: &str) -> Result<Region> {
    regions
        .into_iter()
        .find(|r| &r.code == code)
        .ok_or_else(|| StorefrontError::Validation(format!("unknown {what} code `{code}`")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MockAddressService;

    fn input(province: &str, district: &str, ward: &str) -> ShippingAddressInput {
        ShippingAddressInput {
            full_name: "Trần Thị B".into(), phone: "+84912345678".into(), email: None,
            street: " 12 Lý Thái Tổ ".into(), province_code: province.into(), district_code: district.into(),
            ward_code: ward.into(), postal_code: None,
        }
    }

    fn offline() -> AddressDirectory {
        let mut service = MockAddressService::new();
        service.expect_provinces().returning(|| Err(StorefrontError::Network("timeout".into())));
        service.expect_districts().returning(|_| Err(StorefrontError::Network("timeout".into())));
        service.expect_wards().returning(|_| Ok(vec![]));
        AddressDirectory::new(Arc::new(service))
    }

    #[test]
    fn test_fallback_table_mixed_codes() {
        let table = FallbackTable;
        assert!(table.provinces().iter().any(|p| p.code.as_str() == "02" && p.name == "Hà Giang"));
        let hcm = table.districts(&AddressCode::numeric(AddressLevel::Province, 79));
        assert!(hcm.iter().any(|d| d.code.as_str() == "760"));
        let ba_dinh = table.wards(&AddressCode::normalize(AddressLevel::District, "001"));
        assert_eq!(ba_dinh[0].code.as_str(), "00001");
        assert!(table.wards(&AddressCode::normalize(AddressLevel::District, "999")).is_empty());
    }

    #[tokio::test]
    async fn test_resolve_through_fallback() {
        let resolved = offline().resolve(&input("1", "1", "4")).await.unwrap();
        assert_eq!(resolved.province.name, "Thành phố Hà Nội");
        assert_eq!(resolved.district.name, "Quận Ba Đình");
        assert_eq!(resolved.ward.name, "Trúc Bạch");
        assert_eq!(resolved.street, "12 Lý Thái Tổ");
        assert!(resolved.email.is_none());
    }

    #[tokio::test]
    async fn test_resolve_prefers_live_service() {
        let mut service = MockAddressService::new();
        service.expect_provinces().returning(|| {
            Ok(vec![Region { code: AddressCode::normalize(AddressLevel::Province, "01"), name: "Hà Nội (live)".into() }])
        });
        service.expect_districts().returning(|_| {
            Ok(vec![Region { code: AddressCode::normalize(AddressLevel::District, "001"), name: "Ba Đình (live)".into() }])
        });
        service.expect_wards().returning(|_| {
            Ok(vec![Region { code: AddressCode::normalize(AddressLevel::Ward, "00004"), name: "Trúc Bạch (live)".into() }])
        });
        let resolved = AddressDirectory::new(Arc::new(service)).resolve(&input("01", "001", "00004")).await.unwrap();
        assert_eq!(resolved.province.name, "Hà Nội (live)");
        assert_eq!(resolved.ward.name, "Trúc Bạch (live)");
    }

    #[tokio::test]
    async fn test_resolve_rejects_unknown_codes_and_bad_input() {
        let directory = offline();
        let err = directory.resolve(&input("01", "001", "99999")).await.unwrap_err();
        assert!(matches!(err, StorefrontError::Validation(msg) if msg.contains("ward")));

        let mut bad = input("01", "001", "1");
        bad.full_name.clear();
        assert!(matches!(directory.resolve(&bad).await, Err(StorefrontError::Validation(_))));
    }
}
