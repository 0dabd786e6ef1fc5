//! Enrolment grant and notification fan-out

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult, ValidationFailure};
use crate::notify::{text_to_html, Message, Notifier, Sender};
use crate::settings::{PluginSettings, SiteConfig};
use crate::store::{
    Course, CourseContext, EnrolmentInstance, EnrolmentStore, EnrolmentWindow, NewTransaction,
    User,
};

/// Resolved records a confirmed payment enrols against
#[derive(Debug, Clone)]
pub struct EnrolmentTarget {
    pub instance: EnrolmentInstance,
    pub course: Course,
    pub context: CourseContext,
    pub user: User,
}

/// Load and check instance, course, context and user in that order
pub async fn resolve_target<S>(store: &S, user_id: i64, instance_id: i64) -> BillingResult<EnrolmentTarget>
where
    S: EnrolmentStore + ?Sized,
{
    let invalid = |failure| BillingError::Validation(failure);

    let instance = store
        .active_instance(instance_id)
        .await?
        .ok_or_else(|| invalid(ValidationFailure::Instance(instance_id)))?;
    let course = store
        .course(instance.course_id)
        .await?
        .ok_or_else(|| invalid(ValidationFailure::Course(instance.course_id)))?;
    let context = store
        .course_context(course.id)
        .await?
        .ok_or_else(|| invalid(ValidationFailure::Context(course.id)))?;
    let user = store
        .user(user_id)
        .await?
        .ok_or_else(|| invalid(ValidationFailure::User(user_id)))?;

    Ok(EnrolmentTarget {
        instance,
        course,
        context,
        user,
    })
}

/// Enrolment window dates and seat limit of an instance
pub fn check_availability(
    instance: &EnrolmentInstance,
    enrolled: i64,
    now: OffsetDateTime,
) -> Result<(), ValidationFailure> {
    if let Some(start) = instance.enrol_start_date.filter(|start| *start > now) {
        return Err(ValidationFailure::EnrolmentClosed(format!(
            "You cannot enrol yet. Enrolment starts on {}.",
            start.date()
        )));
    }
    if let Some(end) = instance.enrol_end_date.filter(|end| *end < now) {
        return Err(ValidationFailure::EnrolmentClosed(format!(
            "You cannot enrol anymore. Enrolment ended on {}.",
            end.date()
        )));
    }
    if instance.max_enrolled > 0 && enrolled >= i64::from(instance.max_enrolled) {
        return Err(ValidationFailure::MaxEnrolled);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Granted { window: EnrolmentWindow },
    /// A transaction with the same id was already recorded; nothing was done
    Duplicate,
}

pub fn student_subject(course: &Course) -> String {
    format!("You’re Enrolled: {} Awaits You.", course.shortname)
}

pub fn student_body(course: &Course, site_name: &str) -> String {
    format!(
        "Hello,\nYou have been successfully enrolled in {}. We look forward to your learning journey with us.\nBest regards,\n{} Team",
        course.fullname, site_name
    )
}

pub fn staff_subject(course: &Course, student: &User) -> String {
    format!(
        "New Student Enrollment: {} in {}",
        student.fullname(),
        course.fullname
    )
}

pub fn staff_body(course: &Course, student: &User, site_name: &str) -> String {
    format!(
        "Hello,\nA new student has enrolled in a course.\nStudent Name: {}\nCourse Name: {}\nBest regards,\n{} Team",
        student.fullname(),
        course.fullname,
        site_name
    )
}

fn course_message(
    site: &SiteConfig,
    course: &Course,
    from: Sender,
    to: User,
    subject: String,
    body: String,
) -> Message {
    Message {
        course_id: Some(course.id),
        from,
        to,
        subject,
        full_message_html: text_to_html(&body),
        full_message: body,
        small_message: format!("New Student Enrollment in {}", course.shortname),
        context_url: site.course_url(course.id),
        context_url_name: course.fullname.clone(),
    }
}

/// Messages to send for one enrolment, per the mail flags
pub fn enrolment_messages(
    settings: &PluginSettings,
    site: &SiteConfig,
    course: &Course,
    student: &User,
    teacher: Option<&User>,
    admins: &[User],
) -> Vec<Message> {
    let mut messages = Vec::new();

    if settings.mail_students {
        let from = teacher.cloned().map_or(Sender::NoReply, Sender::User);
        messages.push(course_message(
            site,
            course,
            from,
            student.clone(),
            student_subject(course),
            student_body(course, &site.site_name),
        ));
    }

    if settings.mail_teachers {
        if let Some(teacher) = teacher {
            messages.push(course_message(
                site,
                course,
                Sender::User(student.clone()),
                teacher.clone(),
                staff_subject(course, student),
                staff_body(course, student, &site.site_name),
            ));
        }
    }

    if settings.mail_admins {
        for admin in admins {
            messages.push(course_message(
                site,
                course,
                Sender::User(student.clone()),
                admin.clone(),
                staff_subject(course, student),
                staff_body(course, student, &site.site_name),
            ));
        }
    }

    messages
}

pub struct EnrolmentDispatcher<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    settings: Arc<PluginSettings>,
    site: Arc<SiteConfig>,
}

impl<S: EnrolmentStore, N: Notifier> EnrolmentDispatcher<S, N> {
    pub fn new(
        store: Arc<S>,
        notifier: Arc<N>,
        settings: Arc<PluginSettings>,
        site: Arc<SiteConfig>,
    ) -> Self {
        Self {
            store,
            notifier,
            settings,
            site,
        }
    }

    /// Record the transaction and grant the role for the window atomically,
    /// then notify.
    ///
    /// A duplicate transaction id short-circuits before any grant. A failed
    /// grant keeps no transaction row, so the same return URL can be retried.
    pub async fn dispatch(
        &self,
        target: &EnrolmentTarget,
        transaction: &NewTransaction,
        now: OffsetDateTime,
    ) -> BillingResult<DispatchOutcome> {
        let window = EnrolmentWindow::starting_at(now, target.instance.enrol_period());
        if !self
            .store
            .record_and_enrol(transaction, &target.instance, window)
            .await?
        {
            tracing::info!(
                txn_id = %transaction.txn_id,
                user_id = target.user.id,
                instance_id = target.instance.id,
                "Transaction already recorded, skipping enrolment"
            );
            return Ok(DispatchOutcome::Duplicate);
        }

        tracing::info!(
            user_id = target.user.id,
            course_id = target.course.id,
            instance_id = target.instance.id,
            role_id = target.instance.role_id,
            time_end = ?window.end,
            "User enrolled"
        );

        self.notify(target).await;

        Ok(DispatchOutcome::Granted { window })
    }

    async fn notify(&self, target: &EnrolmentTarget) {
        let settings = &self.settings;
        if !(settings.mail_students || settings.mail_teachers || settings.mail_admins) {
            return;
        }

        let teacher = if settings.mail_students || settings.mail_teachers {
            match self.store.course_teacher(target.context.course_id).await {
                Ok(teacher) => teacher,
                Err(e) => {
                    tracing::warn!(course_id = target.course.id, error = %e, "Teacher lookup failed");
                    None
                }
            }
        } else {
            None
        };

        let admins = if settings.mail_admins {
            self.store.site_admins().await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Site administrator lookup failed");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        let messages = enrolment_messages(
            settings,
            &self.site,
            &target.course,
            &target.user,
            teacher.as_ref(),
            &admins,
        );

        for message in &messages {
            if let Err(e) = self.notifier.send(message).await {
                tracing::warn!(
                    recipient_id = message.to.id,
                    course_id = target.course.id,
                    error = %e,
                    "Failed to send enrolment notification"
                );
            }
        }
    }
}
