//! The dialog's modules, one per step.
//!
//! | Module | Screen | Finishes with |
//! |--------|--------|---------------|
//! | `check_auth` | loading | `AuthenticationChecked` |
//! | `pick_email` | address list | `EmailChosen`, `Authenticate` |
//! | `authenticate` | email entry | `AddressInfo` |
//! | `enter_password` | password | `Authenticated`, `ForgotPassword` |
//! | `new_user` | new password | `UserCreated` |
//! | `forgot_password` | check email | - |
//! | `provision_primary_user` | loading | `PrimaryUserProvisioned`, `PrimaryUserUnauthenticated` |
//! | `verify_primary_user` | provider offer | `PrimaryUserAuthenticating`, `PrimaryUserVerified` |
//! | `generate_assertion` | loading | `AssertionGenerated` |

mod authenticate;
mod check_auth;
mod enter_password;
mod forgot_password;
mod generate_assertion;
mod new_user;
mod pick_email;
mod provision_primary_user;
mod verify_primary_user;

pub use authenticate::Authenticate;
pub use check_auth::CheckAuth;
pub use enter_password::EnterPassword;
pub use forgot_password::ForgotPassword;
pub use generate_assertion::GenerateAssertion;
pub use new_user::NewUser;
pub use pick_email::PickEmail;
pub use provision_primary_user::ProvisionPrimaryUser;
pub use verify_primary_user::VerifyPrimaryUser;
