//! Image resolver: finds the latest firmware and downloads it.

use reqwest::Url;
use tracing::{info, instrument};

use crate::cancel::CancelToken;
use crate::error::UpdateError;
use crate::firmware::{FirmwareDescriptor, FirmwareImage};
use crate::net::HttpFetch;

/// Result of a successful resolve.
#[derive(Debug, Clone)]
pub struct ResolvedFirmware {
    pub descriptor: FirmwareDescriptor,
    pub url: Url,
    pub image: FirmwareImage,
}

/// Fetches the descriptor and the image it names.
///
/// Holds no state between calls; errors are returned as-is and never retried.
pub struct ImageResolver<F> {
    fetcher: F,
    base_url: Url,
    descriptor_name: String,
}

impl<F: HttpFetch> ImageResolver<F> {
    /// `base_url` must be a directory URL (trailing slash).
    pub fn new(fetcher: F, base_url: Url, descriptor_name: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url,
            descriptor_name: descriptor_name.into(),
        }
    }

    fn join(&self, name: &str) -> Result<Url, UpdateError> {
        self.base_url
            .join(name)
            .map_err(|e| UpdateError::InvalidUrl(format!("{}{}: {}", self.base_url, name, e)))
    }

    fn fetch(&self, url: &Url, cancel: &CancelToken) -> Result<Vec<u8>, UpdateError> {
        cancel.check()?;
        let response = self.fetcher.get(url)?;
        if !response.is_success() {
            return Err(UpdateError::DownloadFailed {
                status: response.status,
            });
        }
        Ok(response.body)
    }

    /// URL of the "latest firmware" pointer.
    pub fn descriptor_url(&self) -> Result<Url, UpdateError> {
        self.join(&self.descriptor_name)
    }

    /// URL the image named by `descriptor` is served from.
    pub fn image_url(&self, descriptor: &FirmwareDescriptor) -> Result<Url, UpdateError> {
        self.join(&descriptor.filename)
    }

    /// Fetch and parse the "latest firmware" pointer.
    #[instrument(skip_all)]
    pub fn latest_descriptor(&self, cancel: &CancelToken) -> Result<FirmwareDescriptor, UpdateError> {
        let url = self.descriptor_url()?;
        let body = self.fetch(&url, cancel)?;
        let descriptor = FirmwareDescriptor::from_bytes(&body)?;
        info!(build = %descriptor.build_id, file = %descriptor.filename, "Latest firmware");
        Ok(descriptor)
    }

    /// Download the image named by `descriptor`.
    #[instrument(skip_all, fields(file = %descriptor.filename))]
    pub fn download(
        &self,
        descriptor: &FirmwareDescriptor,
        cancel: &CancelToken,
    ) -> Result<(Url, FirmwareImage), UpdateError> {
        let url = self.image_url(descriptor)?;
        let body = self.fetch(&url, cancel)?;
        info!(bytes = body.len(), "Firmware downloaded");
        Ok((url, FirmwareImage::from_bytes(body)))
    }

    /// Resolve the latest descriptor and download its image.
    pub fn resolve_latest(&self, cancel: &CancelToken) -> Result<ResolvedFirmware, UpdateError> {
        let descriptor = self.latest_descriptor(cancel)?;
        let (url, image) = self.download(&descriptor, cancel)?;
        Ok(ResolvedFirmware {
            descriptor,
            url,
            image,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{FetchError, HttpResponse, MockFetcher};

    const BASE: &str = "https://fw.example.com/firmware/";
    const DESCRIPTOR: &str = "https://fw.example.com/firmware/latest.txt";
    const IMAGE: &str = "https://fw.example.com/firmware/Openterface_Firmware_250306.bin";

    fn resolver(mock: &MockFetcher) -> ImageResolver<MockFetcher> {
        ImageResolver::new(mock.clone(), Url::parse(BASE).unwrap(), "latest.txt")
    }

    #[test]
    fn test_resolve_latest() {
        let mock = MockFetcher::new();
        mock.respond(
            DESCRIPTOR,
            HttpResponse::ok("25022713,Openterface_Firmware_250306.bin\n"),
        );
        mock.respond(IMAGE, HttpResponse::ok(vec![1, 2, 3, 4]));

        let resolved = resolver(&mock).resolve_latest(&CancelToken::new()).unwrap();
        assert_eq!(resolved.descriptor.build_id, "25022713");
        assert_eq!(resolved.url.as_str(), IMAGE);
        assert_eq!(resolved.image.as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(mock.get_requests(), vec![DESCRIPTOR, IMAGE]);
    }

    #[test]
    fn test_malformed_descriptor() {
        let mock = MockFetcher::new();
        mock.respond(DESCRIPTOR, HttpResponse::ok("nocomma"));

        let err = resolver(&mock).resolve_latest(&CancelToken::new()).unwrap_err();
        assert!(matches!(err, UpdateError::InvalidResponse(_)));
        assert_eq!(mock.get_requests().len(), 1);
    }

    #[test]
    fn test_image_status_failure() {
        let mock = MockFetcher::new();
        mock.respond(DESCRIPTOR, HttpResponse::ok("1,missing.bin"));

        let err = resolver(&mock).resolve_latest(&CancelToken::new()).unwrap_err();
        assert_eq!(err, UpdateError::DownloadFailed { status: 404 });
    }

    #[test]
    fn test_descriptor_status_failure() {
        let mock = MockFetcher::new();
        mock.respond(DESCRIPTOR, HttpResponse::status(503));

        let err = resolver(&mock).latest_descriptor(&CancelToken::new()).unwrap_err();
        assert_eq!(err, UpdateError::DownloadFailed { status: 503 });
    }

    #[test]
    fn test_fetch_timeout_maps_to_timeout() {
        let mock = MockFetcher::new();
        mock.fail(
            DESCRIPTOR,
            FetchError::Timeout {
                url: DESCRIPTOR.into(),
            },
        );

        let err = resolver(&mock).latest_descriptor(&CancelToken::new()).unwrap_err();
        assert!(matches!(err, UpdateError::Timeout { .. }));
    }

    #[test]
    fn test_cancelled_before_fetch() {
        let mock = MockFetcher::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = resolver(&mock).resolve_latest(&cancel).unwrap_err();
        assert_eq!(err, UpdateError::Cancelled);
        assert!(mock.get_requests().is_empty());
    }

    #[test]
    fn test_filename_is_url_encoded() {
        let mock = MockFetcher::new();
        let descriptor = FirmwareDescriptor::parse("1,fw 2.bin").unwrap();
        let url = resolver(&mock).image_url(&descriptor).unwrap();
        assert_eq!(url.as_str(), "https://fw.example.com/firmware/fw%202.bin");
    }
}
